use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::Mode;
use crate::session::QuizState;
use crate::store::Timeline;

pub const LOW_TIME_SECONDS: u64 = 5 * 60;

const WEAK_AREA_LIMIT: usize = 3;
const SNIPPET_CHARS: usize = 50;

pub const MOCK_INSIGHT: &str = "Based on your responses, it seems you consistently struggled with \
    questions related to 'Network Protocols'. Consider reviewing this topic. \
    (This is a mock insight; no analysis of your answers was performed.)";

/// Formats seconds as `MM:SS`, or `HH:MM:SS` once there is at least an hour.
pub fn format_time(total_seconds: u64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

fn percentage(part: usize, total: usize) -> f64 {
    if total > 0 {
        part as f64 / total as f64 * 100.0
    } else {
        0.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TimerView {
    pub seconds: u64,
    pub formatted: String,
    pub is_low_time: bool,
}

impl TimerView {
    /// Only an exam in progress shows a clock.
    pub fn new(state: &QuizState) -> Option<TimerView> {
        if !state.is_timed() {
            return None;
        }

        let seconds = state.time_remaining;
        Some(TimerView {
            seconds,
            formatted: format_time(seconds),
            is_low_time: seconds > 0 && seconds <= LOW_TIME_SECONDS,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub percentage: f64,
}

impl Progress {
    pub fn new(state: &QuizState) -> Progress {
        let total = state.questions.len();
        let current = if total > 0 { state.current_index + 1 } else { 0 };

        Progress {
            current,
            total,
            percentage: percentage(current, total),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Summary {
    pub total_questions: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub percentage: f64,
    pub weak_areas: Vec<String>,
    pub insight: &'static str,
    pub retake_mode: Mode,
    pub is_completed: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub elapsed_seconds: Option<i64>,
}

impl Summary {
    pub fn new(state: &QuizState, timeline: &Timeline) -> Summary {
        let total_questions = state.questions.len();
        let correct = state.score.min(total_questions);

        let elapsed_seconds = match (timeline.started_at, timeline.completed_at) {
            (Some(started), Some(completed)) => Some((completed - started).num_seconds()),
            _ => None,
        };

        Summary {
            total_questions,
            correct,
            incorrect: total_questions - correct,
            percentage: percentage(correct, total_questions),
            weak_areas: weak_areas(state),
            insight: MOCK_INSIGHT,
            retake_mode: retake_mode(state),
            is_completed: state.is_completed,
            started_at: timeline.started_at,
            completed_at: timeline.completed_at,
            elapsed_seconds,
        }
    }
}

/// Snippets of the first few questions that were answered and marked wrong.
pub fn weak_areas(state: &QuizState) -> Vec<String> {
    state
        .questions
        .iter()
        .filter(|question| {
            state
                .answers
                .get(&question.id)
                .map(|answer| answer.is_correct != Some(true))
                .unwrap_or(false)
        })
        .take(WEAK_AREA_LIMIT)
        .map(|question| {
            let snippet = question.text.chars().take(SNIPPET_CHARS).collect::<String>();
            format!("{}...", snippet)
        })
        .collect()
}

/// The mode a "retake" should start.
///
/// A finished session no longer records whether it was an exam, so a session
/// whose size equals the configured exam size is taken to be one.
pub fn retake_mode(state: &QuizState) -> Mode {
    match state.mode {
        Some(Mode::Summary) if state.questions.len() == state.exam_config.total_questions => {
            Mode::Exam
        }
        Some(Mode::Exam) => Mode::Exam,
        _ => Mode::Practice,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerValue, ExamConfig, Question, QuestionKind, UserAnswer};

    fn state(len: usize) -> QuizState {
        let questions = (0..len)
            .map(|i| Question {
                id: format!("q{}", i),
                text: format!("{} {}", i, "x".repeat(60)),
                kind: QuestionKind::Input,
                options: Vec::new(),
                answer: "x".into(),
                explanation: String::new(),
                hints: Vec::new(),
                tags: Vec::new(),
            })
            .collect();

        QuizState {
            questions,
            ..QuizState::with_exam_config(ExamConfig {
                total_questions: len,
                duration_minutes: 10,
            })
        }
    }

    fn answer(state: &mut QuizState, id: &str, is_correct: Option<bool>) {
        state.answers.insert(
            id.into(),
            UserAnswer {
                question_id: id.into(),
                value: AnswerValue::from("y"),
                is_correct,
            },
        );
    }

    #[test]
    fn formats_time() {
        assert_eq!(format_time(0), "00:00");
        assert_eq!(format_time(59), "00:59");
        assert_eq!(format_time(61), "01:01");
        assert_eq!(format_time(3600), "01:00:00");
        assert_eq!(format_time(4 * 3600), "04:00:00");
        assert_eq!(format_time(3 * 3600 + 25 * 60 + 7), "03:25:07");
    }

    #[test]
    fn timer_only_for_running_exams() {
        let mut state = state(2);
        assert_eq!(TimerView::new(&state), None);

        state.mode = Some(Mode::Exam);
        state.is_active = true;
        state.time_remaining = 301;
        let view = TimerView::new(&state).unwrap();
        assert_eq!(view.formatted, "05:01");
        assert!(!view.is_low_time);

        state.time_remaining = 300;
        assert!(TimerView::new(&state).unwrap().is_low_time);

        state.time_remaining = 0;
        assert!(!TimerView::new(&state).unwrap().is_low_time);
    }

    #[test]
    fn progress_counts_from_one() {
        let mut state = state(4);
        state.current_index = 1;

        let progress = Progress::new(&state);
        assert_eq!(progress.current, 2);
        assert_eq!(progress.total, 4);
        assert!((progress.percentage - 50.0).abs() < f64::EPSILON);

        assert_eq!(Progress::new(&QuizState::default()).percentage, 0.0);
    }

    #[test]
    fn summary_counts_and_weak_areas() {
        let mut state = state(5);
        state.mode = Some(Mode::Summary);
        state.is_completed = true;
        state.score = 1;
        answer(&mut state, "q0", Some(true));
        answer(&mut state, "q1", Some(false));
        answer(&mut state, "q2", None);
        answer(&mut state, "q3", Some(false));
        answer(&mut state, "q4", Some(false));

        let summary = Summary::new(&state, &Timeline::default());
        assert_eq!(summary.total_questions, 5);
        assert_eq!(summary.correct, 1);
        assert_eq!(summary.incorrect, 4);
        assert!((summary.percentage - 20.0).abs() < 1e-9);
        assert_eq!(summary.weak_areas.len(), 3);
        assert!(summary.weak_areas[0].starts_with("1 x"));
        assert!(summary.weak_areas[1].starts_with("2 x"));
        assert_eq!(summary.weak_areas[0].chars().count(), SNIPPET_CHARS + 3);
        assert!(summary.weak_areas[0].ends_with("..."));
        assert_eq!(summary.retake_mode, Mode::Exam);
        assert_eq!(summary.elapsed_seconds, None);
    }

    #[test]
    fn summary_of_nothing() {
        let summary = Summary::new(&QuizState::default(), &Timeline::default());
        assert_eq!(summary.total_questions, 0);
        assert_eq!(summary.percentage, 0.0);
        assert!(summary.weak_areas.is_empty());
        assert_eq!(summary.retake_mode, Mode::Practice);
    }

    #[test]
    fn elapsed_from_timeline() {
        let started = Utc::now();
        let timeline = Timeline {
            started_at: Some(started),
            completed_at: Some(started + chrono::Duration::seconds(95)),
        };

        let summary = Summary::new(&state(1), &timeline);
        assert_eq!(summary.elapsed_seconds, Some(95));
    }

    #[test]
    fn retake_guesses_practice_for_odd_sizes() {
        let mut state = state(3);
        state.mode = Some(Mode::Summary);
        state.exam_config.total_questions = 125;
        assert_eq!(retake_mode(&state), Mode::Practice);

        state.mode = Some(Mode::Practice);
        assert_eq!(retake_mode(&state), Mode::Practice);
    }
}
