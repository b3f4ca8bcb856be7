//! Narrative restated from snapshot lines, with no model involved.

use std::collections::BTreeMap;

use super::{NarrativeError, NarrativeProvider};
use crate::models::NarrativeSummary;
use crate::snapshot::{MEDICATIONS_HEADER, PROBLEMS_HEADER, RISKS_HEADER, SRC_MARKER, VITALS_HEADER};

const MAX_PROBLEM_BULLETS: usize = 3;
const MAX_MEDICATION_BULLETS: usize = 3;
const MAX_VITAL_BULLETS: usize = 5;

pub const FOLLOWUP_NO_RISKS: &str = "Any new symptoms or concerns since last visit?";
pub const FOLLOWUP_WITH_RISKS: &str = "Are there symptoms related to the listed risks?";

#[derive(Default)]
struct Sections<'a> {
    problems: Vec<&'a str>,
    medications: Vec<&'a str>,
    vitals: Vec<&'a str>,
    risks: Vec<&'a str>,
}

fn split_sections(snapshot: &str) -> Sections<'_> {
    let mut sections = Sections::default();
    let mut current: Option<usize> = None;
    for line in snapshot.lines() {
        match line.trim() {
            PROBLEMS_HEADER => current = Some(0),
            MEDICATIONS_HEADER => current = Some(1),
            VITALS_HEADER => current = Some(2),
            RISKS_HEADER => current = Some(3),
            "" => {}
            _ => {
                let bucket = match current {
                    Some(0) => &mut sections.problems,
                    Some(1) => &mut sections.medications,
                    Some(2) => &mut sections.vitals,
                    Some(_) => &mut sections.risks,
                    None => continue,
                };
                bucket.push(line);
            }
        }
    }
    sections
}

/// Split `text | src: A/1, B/2` into the text and its source tokens.
fn split_citation(line: &str) -> (&str, Vec<String>) {
    match line.split_once(SRC_MARKER) {
        Some((text, src)) => (
            text.trim(),
            src.split(|c: char| c == ',' || c.is_whitespace())
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        ),
        None => (line.trim(), Vec::new()),
    }
}

struct RiskBlock<'a> {
    header: &'a str,
    sources: Vec<String>,
}

fn risk_blocks<'a>(lines: &[&'a str]) -> Vec<RiskBlock<'a>> {
    let mut blocks: Vec<RiskBlock<'a>> = Vec::new();
    for line in lines {
        match line.strip_prefix("  - src:") {
            Some(src) => {
                if let Some(block) = blocks.last_mut() {
                    block.sources.push(src.trim().to_string());
                }
            }
            None => blocks.push(RiskBlock {
                header: line.trim(),
                sources: Vec::new(),
            }),
        }
    }
    blocks
}

/// Restates snapshot lines as cited bullets.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeterministicNarrative;

impl DeterministicNarrative {
    pub fn summarize(snapshot: &str, patient_id: &str) -> NarrativeSummary {
        let sections = split_sections(snapshot);
        let mut citations = BTreeMap::new();
        let mut summary_bullets = Vec::new();

        let groups = [
            ("Recent problem", &sections.problems, MAX_PROBLEM_BULLETS),
            ("Medication", &sections.medications, MAX_MEDICATION_BULLETS),
            ("Key vital/lab", &sections.vitals, MAX_VITAL_BULLETS),
        ];
        for (label, lines, cap) in groups {
            for line in lines.iter().take(cap) {
                let (text, sources) = split_citation(line);
                let tag = format!("S{}", summary_bullets.len() + 1);
                summary_bullets.push(format!("{label}: {text}. [{tag}]"));
                citations.insert(tag, sources);
            }
        }

        let mut risk_bullets = Vec::new();
        for block in risk_blocks(&sections.risks) {
            let tag = format!("R{}", risk_bullets.len() + 1);
            risk_bullets.push(format!("{} [{tag}]", block.header));
            citations.insert(tag, block.sources);
        }

        let followup = if risk_bullets.is_empty() {
            FOLLOWUP_NO_RISKS
        } else {
            FOLLOWUP_WITH_RISKS
        };

        NarrativeSummary {
            patient_id: patient_id.to_string(),
            summary_bullets,
            risk_bullets,
            followup_questions: vec![followup.to_string()],
            citations,
        }
    }
}

impl NarrativeProvider for DeterministicNarrative {
    fn name(&self) -> &'static str {
        "deterministic"
    }

    fn generate(&self, snapshot: &str, patient_id: &str) -> Result<NarrativeSummary, NarrativeError> {
        Ok(Self::summarize(snapshot, patient_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrative::validate_narrative;

    const SNAPSHOT: &str = "Patient: p1 | sex=female | age=53 | last_seen=2024-02-10
Recent problems:
2020-01-01 | Hypertension | src: Condition/c2
2015-03-01 | Diabetes mellitus type 2 | src: Condition/c1
Medications:
2015-03-02 | Metformin 500 MG | src: MedicationRequest/m1
Key vitals/labs:
BP (85354-9): 142/91 on 2024-01-10 | src: Observation/bp1
A1c (4548-4): 7.2 % on 2024-02-10 | src: Observation/a1
Risks:
lab_a1c_elevated | high | A1c in diabetes range: 7.2 % on 2024-02-10
  - src: Observation/a1
vitals_bp_elevated | medium | elevated BP: 142/91 on 2024-01-10
  - src: Observation/bp1";

    #[test]
    fn bullets_cite_snapshot_tokens() {
        let narrative = DeterministicNarrative::summarize(SNAPSHOT, "p1");
        assert_eq!(narrative.summary_bullets.len(), 5);
        assert_eq!(narrative.summary_bullets[0], "Recent problem: 2020-01-01 | Hypertension. [S1]");
        assert_eq!(narrative.summary_bullets[2], "Medication: 2015-03-02 | Metformin 500 MG. [S3]");
        assert_eq!(narrative.citations["S4"], vec!["Observation/bp1".to_string()]);
        assert_eq!(
            narrative.risk_bullets[0],
            "lab_a1c_elevated | high | A1c in diabetes range: 7.2 % on 2024-02-10 [R1]"
        );
        assert_eq!(narrative.citations["R2"], vec!["Observation/bp1".to_string()]);
        assert_eq!(narrative.followup_questions, vec![FOLLOWUP_WITH_RISKS.to_string()]);
    }

    #[test]
    fn no_risks_asks_the_general_question() {
        let snapshot = SNAPSHOT.split("Risks:").next().unwrap_or_default().to_string() + "Risks:";
        let narrative = DeterministicNarrative::summarize(&snapshot, "p1");
        assert!(narrative.risk_bullets.is_empty());
        assert_eq!(narrative.followup_questions, vec![FOLLOWUP_NO_RISKS.to_string()]);
    }

    #[test]
    fn caps_problem_bullets_and_keeps_uncited_lines() {
        let snapshot = "Recent problems:\na | src: Condition/1\nb | src: Condition/2\nc | src: Condition/3\nd | src: Condition/4\nKey vitals/labs:\nBMI unknown";
        let narrative = DeterministicNarrative::summarize(snapshot, "p1");
        assert_eq!(narrative.summary_bullets.len(), 4);
        assert_eq!(narrative.summary_bullets[3], "Key vital/lab: BMI unknown. [S4]");
        assert!(narrative.citations["S4"].is_empty());
    }

    #[test]
    fn output_meets_the_model_contract() {
        let narrative = DeterministicNarrative::summarize(SNAPSHOT, "p1");
        let raw = serde_json::to_string(&narrative).unwrap();
        assert_eq!(validate_narrative(&raw).unwrap(), narrative);
    }
}
