/// Build the narrative prompt around a rendered snapshot.
///
/// The rules and JSON shape here are what `validate_narrative` enforces on
/// the reply.
pub fn build_prompt(snapshot: &str) -> String {
    format!(
        r#"You will be given a deterministic clinical snapshot.
Rules:
- Do NOT add facts not explicitly present in snapshot_text.
- Summary bullets must end with [S#]; risk bullets must end with [R#].
- Follow-up questions must NOT include citation tags.
- Only cite IDs that appear verbatim in snapshot_text after 'src:'.
- Do NOT use '...' anywhere.
- If you cannot cite, write 'not documented in provided record' and leave citations empty.
- If unsure, say "not documented in provided record".
Return ONLY valid JSON. No markdown. No code fences. No commentary.
JSON schema:
{{"patient_id":"<str>","summary_bullets":["- ... [S1]"],"risk_bullets":["- ... [R1]"],"followup_questions":["- ..."],"citations":{{"S1":["Observation/abc123"]}}}}
snapshot_text:
{snapshot}"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_appended_after_schema() {
        let prompt = build_prompt("Patient: p1 | sex=female");
        assert!(prompt.starts_with("You will be given a deterministic clinical snapshot.\nRules:\n"));
        assert!(prompt.ends_with("snapshot_text:\nPatient: p1 | sex=female"));
        assert!(prompt.contains(r#""citations":{"S1":["Observation/abc123"]}}"#));
    }
}
