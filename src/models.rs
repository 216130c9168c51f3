use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeSet, fmt};

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub exam: ExamConfigPatch,

    #[serde(default, rename = "question")]
    pub questions: Vec<Question>,
}

impl Config {
    /// Rejects banks that would make session lookups ambiguous.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for question in &self.questions {
            if !seen.insert(question.id.as_str()) {
                return Err(anyhow!("duplicate question id {:?}", question.id));
            }
            if question.kind == QuestionKind::Mcq && question.options.is_empty() {
                return Err(anyhow!("question {:?} is mcq but has no options", question.id));
            }
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    Mcq,
    TrueFalse,
    Input,
    FillIn,
}

/// A submitted or canonical answer.
///
/// Booleans are tried first so that `true` in TOML or JSON never ends up as
/// the string `"true"`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum AnswerValue {
    Bool(bool),
    Text(String),
    Blanks(Vec<String>),
}

impl AnswerValue {
    pub fn empty() -> AnswerValue {
        AnswerValue::Text(String::new())
    }
}

impl From<&str> for AnswerValue {
    fn from(text: &str) -> Self {
        AnswerValue::Text(text.into())
    }
}

impl From<bool> for AnswerValue {
    fn from(value: bool) -> Self {
        AnswerValue::Bool(value)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Question {
    pub id: String,
    pub text: String,

    #[serde(rename = "type")]
    pub kind: QuestionKind,

    #[serde(default)]
    pub options: Vec<String>,

    pub answer: AnswerValue,

    #[serde(default)]
    pub explanation: String,

    #[serde(default)]
    pub hints: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct UserAnswer {
    pub question_id: String,
    pub value: AnswerValue,
    pub is_correct: Option<bool>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Practice,
    Exam,
    Summary,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExamConfig {
    pub total_questions: usize,
    pub duration_minutes: u64,
}

impl Default for ExamConfig {
    fn default() -> Self {
        // CEH: 125 questions in four hours.
        ExamConfig {
            total_questions: 125,
            duration_minutes: 240,
        }
    }
}

impl ExamConfig {
    pub fn merge(self, patch: &ExamConfigPatch) -> ExamConfig {
        ExamConfig {
            total_questions: patch.total_questions.unwrap_or(self.total_questions),
            duration_minutes: patch.duration_minutes.unwrap_or(self.duration_minutes),
        }
    }

    pub fn duration_seconds(&self) -> u64 {
        self.duration_minutes.saturating_mul(60)
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ExamConfigPatch {
    pub total_questions: Option<usize>,
    pub duration_minutes: Option<u64>,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub [u8; 16]);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BANK: &str = r#"
        [exam]
        total_questions = 2

        [[question]]
        id = "q1"
        text = "Which port does SSH use by default?"
        type = "mcq"
        options = ["21", "22", "23"]
        answer = "22"
        explanation = "SSH listens on TCP 22."
        hints = ["It is one above FTP."]

        [[question]]
        id = "q2"
        text = "Nmap -sS performs a full TCP connect scan."
        type = "true_false"
        answer = false

        [[question]]
        id = "q3"
        text = "Name the three steps of the TCP handshake."
        type = "fill_in"
        answer = ["SYN", "SYN-ACK", "ACK"]
    "#;

    #[test]
    fn parses_bank() {
        let config: Config = toml::de::from_str(BANK).unwrap();
        config.validate().unwrap();

        assert_eq!(config.exam.total_questions, Some(2));
        assert_eq!(config.exam.duration_minutes, None);
        assert_eq!(config.questions.len(), 3);
        assert_eq!(config.questions[0].answer, AnswerValue::Text("22".into()));
        assert_eq!(config.questions[1].answer, AnswerValue::Bool(false));
        assert_eq!(config.questions[1].kind, QuestionKind::TrueFalse);
        assert!(config.questions[1].hints.is_empty());
        assert_eq!(
            config.questions[2].answer,
            AnswerValue::Blanks(vec!["SYN".into(), "SYN-ACK".into(), "ACK".into()])
        );
    }

    #[test]
    fn shipped_bank_is_valid() {
        let config: Config = toml::de::from_str(include_str!("../quiz.toml")).unwrap();
        config.validate().unwrap();
        assert!(!config.questions.is_empty());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let bank = r#"
            [[question]]
            id = "q1"
            text = "a"
            type = "input"
            answer = "a"

            [[question]]
            id = "q1"
            text = "b"
            type = "input"
            answer = "b"
        "#;
        let config: Config = toml::de::from_str(bank).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn answer_value_json_shapes() {
        let value: AnswerValue = serde_json::from_str("true").unwrap();
        assert_eq!(value, AnswerValue::Bool(true));

        let value: AnswerValue = serde_json::from_str("\"true\"").unwrap();
        assert_eq!(value, AnswerValue::Text("true".into()));

        let value: AnswerValue = serde_json::from_str(r#"["a", "b"]"#).unwrap();
        assert_eq!(value, AnswerValue::Blanks(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn merge_keeps_unset_fields() {
        let config = ExamConfig::default().merge(&ExamConfigPatch {
            total_questions: Some(10),
            duration_minutes: None,
        });

        assert_eq!(config.total_questions, 10);
        assert_eq!(config.duration_minutes, 240);
        assert_eq!(config.duration_seconds(), 240 * 60);
    }
}
