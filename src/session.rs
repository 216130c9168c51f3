use log::debug;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::matching::{matches, sample};
use crate::models::{AnswerValue, ExamConfig, ExamConfigPatch, Mode, Question, UserAnswer};

/// Every event that can change a quiz session.
#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    StartQuiz {
        questions: Vec<Question>,
        mode: Mode,
        config: Option<ExamConfigPatch>,
    },
    SelectAnswer {
        question_id: String,
        value: AnswerValue,
    },
    SubmitAnswer {
        question_id: String,
    },
    SubmitAllAnswers,
    NextQuestion,
    PrevQuestion,
    SetTimeLeft(u64),
    CompleteQuiz,
    ResetQuiz,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::StartQuiz { .. } => "start_quiz",
            Action::SelectAnswer { .. } => "select_answer",
            Action::SubmitAnswer { .. } => "submit_answer",
            Action::SubmitAllAnswers => "submit_all_answers",
            Action::NextQuestion => "next_question",
            Action::PrevQuestion => "prev_question",
            Action::SetTimeLeft(_) => "set_time_left",
            Action::CompleteQuiz => "complete_quiz",
            Action::ResetQuiz => "reset_quiz",
        }
    }
}

/// The whole state of one quiz session.
///
/// The default value is the "no session" state: no questions, no mode and
/// both lifecycle flags cleared.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct QuizState {
    pub questions: Vec<Question>,
    pub current_index: usize,
    pub answers: BTreeMap<String, UserAnswer>,
    pub score: usize,
    pub mode: Option<Mode>,
    pub time_remaining: u64,
    pub is_active: bool,
    pub is_completed: bool,
    pub exam_config: ExamConfig,
}

impl QuizState {
    pub fn with_exam_config(exam_config: ExamConfig) -> QuizState {
        QuizState {
            exam_config,
            ..Default::default()
        }
    }

    pub fn question(&self, question_id: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.id == question_id)
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    pub fn is_last_question(&self) -> bool {
        self.current_index + 1 >= self.questions.len()
    }

    /// Whether the exam clock should be running for this state.
    pub fn is_timed(&self) -> bool {
        self.is_active && self.mode == Some(Mode::Exam)
    }

    /// Evaluates a draft answer without recording it.
    pub fn check_answer(&self, question_id: &str, value: &AnswerValue) -> bool {
        self.question(question_id)
            .map(|question| matches(question, value))
            .unwrap_or(false)
    }

    /// Applies `action` and returns the resulting state.
    ///
    /// `rng` is only consulted when an exam is started.
    pub fn reduce<R: Rng + ?Sized>(self, action: Action, rng: &mut R) -> QuizState {
        debug!("reducing {}", action.name());

        match action {
            Action::StartQuiz {
                questions,
                mode,
                config,
            } => {
                let exam_config = match config {
                    Some(patch) => self.exam_config.merge(&patch),
                    None => self.exam_config,
                };

                let (questions, time_remaining) = match mode {
                    Mode::Exam => (
                        sample(&questions, exam_config.total_questions, rng),
                        exam_config.duration_seconds(),
                    ),
                    _ => (questions, 0),
                };

                QuizState {
                    questions,
                    mode: Some(mode),
                    time_remaining,
                    is_active: true,
                    is_completed: false,
                    ..QuizState::with_exam_config(exam_config)
                }
            }
            Action::SelectAnswer { question_id, value } => {
                if !self.is_active {
                    return self;
                }

                let mut state = self;
                let is_correct = state
                    .answers
                    .get(&question_id)
                    .and_then(|answer| answer.is_correct);
                state.answers.insert(
                    question_id.clone(),
                    UserAnswer {
                        question_id,
                        value,
                        is_correct,
                    },
                );
                state
            }
            Action::SubmitAnswer { question_id } => {
                let is_correct = match (
                    self.question(&question_id),
                    self.answers.get(&question_id),
                ) {
                    (Some(question), Some(answer)) => matches(question, &answer.value),
                    _ => return self,
                };

                let mut state = self;
                let practice = state.mode == Some(Mode::Practice);
                if let Some(answer) = state.answers.get_mut(&question_id) {
                    let first_time = answer.is_correct.is_none();
                    answer.is_correct = Some(is_correct);
                    if practice && is_correct && first_time {
                        state.score += 1;
                    }
                }
                state
            }
            Action::SubmitAllAnswers => {
                let mut state = self;
                let mut answers = BTreeMap::new();
                for question in &state.questions {
                    let answer = match state.answers.remove(&question.id) {
                        Some(answer) => UserAnswer {
                            is_correct: Some(matches(question, &answer.value)),
                            ..answer
                        },
                        None => UserAnswer {
                            question_id: question.id.clone(),
                            value: AnswerValue::empty(),
                            is_correct: Some(false),
                        },
                    };
                    answers.insert(question.id.clone(), answer);
                }

                state.score = answers
                    .values()
                    .filter(|answer| answer.is_correct == Some(true))
                    .count();
                state.answers = answers;
                state.is_completed = true;
                state.is_active = false;
                state
            }
            Action::NextQuestion => {
                let mut state = self;
                if !state.is_last_question() {
                    state.current_index += 1;
                }
                state
            }
            Action::PrevQuestion => {
                let mut state = self;
                if state.current_index > 0 {
                    state.current_index -= 1;
                }
                state
            }
            Action::SetTimeLeft(seconds) => QuizState {
                time_remaining: seconds,
                ..self
            },
            Action::CompleteQuiz => QuizState {
                is_active: false,
                is_completed: true,
                mode: Some(Mode::Summary),
                ..self
            },
            Action::ResetQuiz => QuizState::with_exam_config(self.exam_config),
        }
    }
}
