//! Solution step synthesis

use crate::question::Question;

/// Placeholder answer when no option is marked correct
pub const ANSWER_NOT_AVAILABLE: &str = "Not available";

/// Ordered explanation steps for a matched question.
///
/// Topic, question, correct answer, then the correct option's explanation
/// when it has a non-empty one.
pub fn synthesize(question: &Question) -> Vec<String> {
    let correct = question.correct_option();

    let mut steps = vec![
        format!("Topic: {}", question.topic),
        format!("Question: {}", question.question_text),
        format!(
            "Correct Answer: {}",
            correct.map_or(ANSWER_NOT_AVAILABLE, |o| o.text.as_str())
        ),
    ];

    if let Some(explanation) = correct
        .and_then(|o| o.explanation.as_deref())
        .filter(|e| !e.trim().is_empty())
    {
        steps.push(format!("Explanation: {}", explanation));
    }

    steps
}
