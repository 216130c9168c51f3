use rand::prelude::*;

use crate::models::{AnswerValue, Question};

fn same_text(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

/// Decides whether `submitted` is a correct answer to `question`.
///
/// A submission of the wrong shape is simply incorrect.
pub fn matches(question: &Question, submitted: &AnswerValue) -> bool {
    match (&question.answer, submitted) {
        (AnswerValue::Blanks(correct), AnswerValue::Blanks(given)) => {
            correct.len() == given.len()
                && correct
                    .iter()
                    .zip(given.iter())
                    .all(|(correct, given)| same_text(correct, given))
        }
        (AnswerValue::Text(correct), AnswerValue::Text(given)) => same_text(correct, given),
        (AnswerValue::Bool(correct), AnswerValue::Bool(given)) => correct == given,
        (AnswerValue::Bool(correct), AnswerValue::Text(given)) => {
            same_text(&correct.to_string(), given)
        }
        _ => false,
    }
}

/// Picks up to `count` distinct questions from `bank` in random order.
pub fn sample<R: Rng + ?Sized>(bank: &[Question], count: usize, rng: &mut R) -> Vec<Question> {
    let mut questions = bank.to_vec();
    questions.shuffle(rng);
    questions.truncate(count);
    questions
}
