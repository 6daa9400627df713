//! Output schemas advertised in `tools/list`.

use serde_json::{json, Value};

fn string() -> Value {
    json!({ "type": "string" })
}

fn number() -> Value {
    json!({ "type": "number" })
}

fn strings() -> Value {
    json!({ "type": "array", "items": { "type": "string" } })
}

fn object(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

fn severity() -> Value {
    json!({ "type": "string", "enum": ["SEV1", "SEV2", "SEV3"] })
}

fn status() -> Value {
    json!({ "type": "string", "enum": ["active", "archived"] })
}

pub fn observation() -> Value {
    object(
        json!({
            "id": string(),
            "caseId": string(),
            "what": string(),
            "context": string(),
            "gitBranch": string(),
            "gitCommit": string(),
            "deployEnv": string(),
            "createdAt": string(),
        }),
        &["id", "caseId", "what", "createdAt"],
    )
}

pub fn hypothesis() -> Value {
    object(
        json!({
            "id": string(),
            "caseId": string(),
            "text": string(),
            "rationale": string(),
            "confidence": { "type": "number", "minimum": 0, "maximum": 1 },
            "createdAt": string(),
            "updatedAt": string(),
        }),
        &["id", "caseId", "text", "createdAt", "updatedAt"],
    )
}

pub fn test_plan() -> Value {
    object(
        json!({
            "id": string(),
            "caseId": string(),
            "hypothesisId": string(),
            "method": string(),
            "expected": string(),
            "metric": string(),
            "priority": { "type": "integer", "minimum": 1, "maximum": 10 },
            "gitBranch": string(),
            "gitCommit": string(),
            "deployEnv": string(),
            "createdAt": string(),
            "updatedAt": string(),
        }),
        &["id", "caseId", "hypothesisId", "method", "expected", "createdAt", "updatedAt"],
    )
}

pub fn conclusion() -> Value {
    object(
        json!({
            "id": string(),
            "caseId": string(),
            "rootCauses": strings(),
            "fix": string(),
            "followUps": strings(),
            "createdAt": string(),
            "updatedAt": string(),
            "confidenceMarker": { "type": "string", "enum": ["🟢", "🔵", "🟡", "🔴"] },
        }),
        &["id", "caseId", "rootCauses", "fix", "createdAt", "updatedAt"],
    )
}

pub fn case() -> Value {
    object(
        json!({
            "id": string(),
            "title": string(),
            "severity": severity(),
            "tags": strings(),
            "status": status(),
            "gitBranch": string(),
            "gitCommit": string(),
            "deployEnv": string(),
            "observations": { "type": "array", "items": observation() },
            "impacts": { "type": "array", "items": { "type": "object" } },
            "hypotheses": { "type": "array", "items": hypothesis() },
            "tests": { "type": "array", "items": test_plan() },
            "results": { "type": "array", "items": { "type": "object" } },
            "conclusion": conclusion(),
            "createdAt": string(),
            "updatedAt": string(),
        }),
        &[
            "id",
            "title",
            "severity",
            "tags",
            "status",
            "observations",
            "impacts",
            "hypotheses",
            "tests",
            "results",
            "createdAt",
            "updatedAt",
        ],
    )
}

pub fn case_summary() -> Value {
    object(
        json!({
            "id": string(),
            "title": string(),
            "severity": severity(),
            "status": status(),
            "tags": strings(),
            "createdAt": string(),
            "updatedAt": string(),
            "observationCount": { "type": "integer", "minimum": 0 },
        }),
        &["id", "title", "severity", "status", "tags", "createdAt", "updatedAt", "observationCount"],
    )
}

pub fn case_create_output() -> Value {
    object(json!({ "caseId": string(), "case": case() }), &["caseId", "case"])
}

pub fn case_get_output() -> Value {
    object(
        json!({
            "case": case(),
            "cursors": object(
                json!({
                    "nextObservationCursor": string(),
                    "observationLimit": { "type": "integer", "minimum": 1 },
                    "observationReturned": { "type": "integer", "minimum": 0 },
                    "observationTotal": { "type": "integer", "minimum": 0 },
                    "hasMoreObservations": { "type": "boolean" },
                }),
                &[],
            ),
        }),
        &["case"],
    )
}

pub fn case_list_output() -> Value {
    object(
        json!({
            "cases": { "type": "array", "items": case_summary() },
            "nextCursor": string(),
            "total": { "type": "integer", "minimum": 0 },
        }),
        &["cases", "total"],
    )
}

pub fn case_output() -> Value {
    object(json!({ "case": case() }), &["case"])
}

pub fn observation_output() -> Value {
    object(
        json!({ "caseId": string(), "observation": observation(), "case": case() }),
        &["caseId", "observation", "case"],
    )
}

pub fn observations_list_output() -> Value {
    object(
        json!({
            "caseId": string(),
            "observations": { "type": "array", "items": observation() },
            "nextCursor": string(),
            "total": { "type": "integer", "minimum": 0 },
            "pageSize": { "type": "integer", "minimum": 1 },
            "hasMore": { "type": "boolean" },
        }),
        &["caseId", "observations", "total", "pageSize", "hasMore"],
    )
}

pub fn hypothesis_propose_output() -> Value {
    let mut item = hypothesis();
    item["properties"]["testPlan"] = test_plan();
    item["required"] = json!(["id", "caseId", "text", "createdAt", "updatedAt", "testPlan"]);
    object(
        json!({ "hypotheses": { "type": "array", "items": item } }),
        &["hypotheses"],
    )
}

pub fn hypothesis_output() -> Value {
    object(
        json!({ "caseId": string(), "hypothesis": hypothesis(), "case": case() }),
        &["caseId", "hypothesis", "case"],
    )
}

pub fn test_plan_output() -> Value {
    object(
        json!({ "caseId": string(), "testPlan": test_plan(), "case": case() }),
        &["caseId", "testPlan", "case"],
    )
}

pub fn prioritize_output() -> Value {
    object(
        json!({
            "ranked": {
                "type": "array",
                "items": object(
                    json!({
                        "id": string(),
                        "reach": number(),
                        "impact": number(),
                        "confidence": number(),
                        "effort": number(),
                        "ease": number(),
                        "score": number(),
                        "rank": { "type": "integer", "minimum": 1 },
                    }),
                    &["id", "impact", "confidence", "score", "rank"],
                ),
            },
        }),
        &["ranked"],
    )
}

pub fn conclusion_output() -> Value {
    object(json!({ "conclusion": conclusion() }), &["conclusion"])
}

pub fn bulk_delete_output() -> Value {
    object(
        json!({
            "deletedHypotheses": { "type": "array", "items": hypothesis() },
            "deletedTestPlans": { "type": "array", "items": test_plan() },
            "case": case(),
        }),
        &["deletedHypotheses", "deletedTestPlans", "case"],
    )
}

pub fn best_practices_output() -> Value {
    object(
        json!({
            "systemPreamble": string(),
            "heuristics": strings(),
            "antiPatterns": strings(),
            "citations": strings(),
        }),
        &["systemPreamble", "heuristics", "antiPatterns"],
    )
}

pub fn phase_output() -> Value {
    object(
        json!({
            "steps": strings(),
            "checklists": strings(),
            "redFlags": strings(),
            "toolHints": strings(),
        }),
        &["steps", "checklists", "redFlags", "toolHints"],
    )
}
