use hippocrates_core::ConsultationError;
use hippocrates_schema::{RedFlagWarning, ScoredChunk, TurnOutput, TurnReply};

fn push_red_flags(out: &mut String, red_flags: &[RedFlagWarning]) {
    for warning in red_flags {
        out.push_str(&format!("RED FLAG ({}): {}\n", warning.symptom, warning.message));
    }
}

/// Plain-text rendering of one turn for the terminal.
pub fn render_turn(output: &TurnOutput) -> String {
    let mut out = String::new();
    push_red_flags(&mut out, &output.red_flags);

    match &output.reply {
        TurnReply::FollowUpQuestion { text, options } => {
            out.push_str(text);
            out.push('\n');
            if !options.is_empty() {
                let options: Vec<String> = options.iter().map(|o| format!("[{o}]")).collect();
                out.push_str(&format!("  {}\n", options.join(" ")));
            }
        }
        TurnReply::DifferentialDiagnosis {
            summary,
            candidates,
        } => {
            if let Some(summary) = summary {
                out.push_str(summary);
                out.push('\n');
            }
            if candidates.is_empty() {
                out.push_str("No matching conditions in the knowledge base.\n");
            } else {
                out.push_str("Differential diagnosis:\n");
            }
            for (i, candidate) in candidates.iter().enumerate() {
                out.push_str(&format!(
                    "  {}. {} ({} confidence, score {:.2})\n",
                    i + 1,
                    candidate.condition,
                    candidate.band.as_str(),
                    candidate.score
                ));
                if let Some(rationale) = &candidate.rationale {
                    out.push_str(&format!("     Why: {rationale}\n"));
                }
                if !candidate.next_steps.is_empty() {
                    out.push_str(&format!("     Next steps: {}\n", candidate.next_steps.join("; ")));
                }
                let sources: Vec<String> = candidate
                    .citations
                    .iter()
                    .map(|c| {
                        if c.title.is_empty() {
                            c.source.clone()
                        } else {
                            format!("{} ({})", c.source, c.title)
                        }
                    })
                    .collect();
                out.push_str(&format!("     Sources: {}\n", sources.join("; ")));
            }
        }
    }

    for caveat in &output.caveats {
        out.push_str(&format!("Note: {caveat}\n"));
    }
    out.push_str(&format!("-- {}\n", output.disclaimer));
    out
}

pub fn render_error(err: &ConsultationError) -> String {
    let mut out = String::new();
    push_red_flags(&mut out, err.red_flags());
    match err {
        ConsultationError::GenerationTimeout { .. } | ConsultationError::GenerationUnavailable { .. } => {
            out.push_str(&format!(
                "Sorry, the assistant could not answer just now ({err}). Please send your message again.\n"
            ));
        }
        ConsultationError::NotFound(_) | ConsultationError::Busy => {
            out.push_str(&format!("Error: {err}\n"));
        }
    }
    out
}

pub fn render_hits(hits: &[ScoredChunk]) -> String {
    if hits.is_empty() {
        return "No matching chunks.\n".to_string();
    }
    let mut out = format!("{:<6} {:<28} {}\n", "SCORE", "CONDITION", "SOURCE");
    for hit in hits {
        out.push_str(&format!(
            "{:<6.3} {:<28} {}\n",
            hit.score, hit.chunk.tags.condition, hit.chunk.citation.source
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use hippocrates_schema::{Citation, ConfidenceBand, DiagnosisCandidate, Phase, DISCLAIMER};

    fn output(reply: TurnReply) -> TurnOutput {
        TurnOutput {
            consultation_id: Default::default(),
            reply,
            phase: Phase::Reporting,
            red_flags: vec![],
            caveats: vec![],
            disclaimer: DISCLAIMER.to_string(),
        }
    }

    #[test]
    fn differential_lists_sources_and_disclaimer() {
        let text = render_turn(&output(TurnReply::DifferentialDiagnosis {
            summary: None,
            candidates: vec![DiagnosisCandidate {
                condition: "Strep Pharyngitis".into(),
                score: 0.752,
                band: ConfidenceBand::High,
                citations: vec![Citation::new("CDC", "Strep Throat")],
                red_flags: vec![],
                next_steps: vec!["Rapid Strep Test".into()],
                rationale: Some("reported fever; no cough".into()),
            }],
        }));
        assert!(text.contains("1. Strep Pharyngitis (High confidence, score 0.75)"));
        assert!(text.contains("Sources: CDC (Strep Throat)"));
        assert!(text.contains("Next steps: Rapid Strep Test"));
        assert!(text.ends_with(&format!("-- {DISCLAIMER}\n")));
    }

    #[test]
    fn red_flags_come_first() {
        let mut turn = output(TurnReply::FollowUpQuestion {
            text: "Do you have a fever?".into(),
            options: vec!["Yes".into(), "No".into()],
        });
        turn.red_flags.push(RedFlagWarning {
            symptom: "stridor".into(),
            message: "Seek emergency care.".into(),
        });
        let text = render_turn(&turn);
        assert!(text.starts_with("RED FLAG (stridor): Seek emergency care.\nDo you have a fever?\n"));
        assert!(text.contains("[Yes] [No]"));
    }

    #[test]
    fn errors_keep_red_flags_visible() {
        let err = ConsultationError::GenerationTimeout {
            attempts: 2,
            red_flags: vec![RedFlagWarning {
                symptom: "drooling".into(),
                message: "Seek care now.".into(),
            }],
        };
        let text = render_error(&err);
        assert!(text.starts_with("RED FLAG (drooling)"));
        assert!(text.contains("send your message again"));
    }
}
