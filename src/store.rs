use chrono::{DateTime, Utc};
use log::{debug, info};
use rand::{rngs::StdRng, SeedableRng};
use std::{
    mem,
    sync::{Arc, Weak},
};
use tokio::sync::Mutex;

use crate::models::ExamConfig;
use crate::session::{Action, QuizState};
use crate::timer::{self, TimerHandle};

/// Wall-clock bounds of the current session.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Timeline {
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// One quiz session and the exam clock that drives it.
///
/// Clones share the same session.
#[derive(Clone, Debug)]
pub struct QuizStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    state: QuizState,
    rng: StdRng,
    timeline: Timeline,
    // Bumped whenever a session is started or reset; ticks from an older
    // epoch are ignored.
    epoch: u64,
    timer: Option<TimerHandle>,
}

impl QuizStore {
    pub fn new(exam_config: ExamConfig) -> QuizStore {
        QuizStore::with_rng(exam_config, StdRng::from_entropy())
    }

    pub fn with_rng(exam_config: ExamConfig, rng: StdRng) -> QuizStore {
        let inner = Inner {
            state: QuizState::with_exam_config(exam_config),
            rng,
            timeline: Timeline::default(),
            epoch: 0,
            timer: None,
        };

        QuizStore {
            inner: Arc::new(Mutex::new(inner)),
        }
    }

    pub async fn snapshot(&self) -> QuizState {
        self.inner.lock().await.state.clone()
    }

    pub async fn timeline(&self) -> Timeline {
        self.inner.lock().await.timeline
    }

    pub async fn dispatch(&self, action: Action) -> QuizState {
        self.dispatch_all(vec![action]).await
    }

    /// Applies `actions` in order without letting a clock tick in between.
    pub async fn dispatch_all(&self, actions: Vec<Action>) -> QuizState {
        let mut inner = self.inner.lock().await;
        for action in actions {
            inner.apply(action);
        }
        sync_timer(&self.inner, &mut inner);
        inner.state.clone()
    }

    #[cfg(test)]
    async fn has_timer(&self) -> bool {
        self.inner.lock().await.timer.is_some()
    }
}

impl Inner {
    fn apply(&mut self, action: Action) {
        let restarts = matches!(action, Action::StartQuiz { .. } | Action::ResetQuiz);
        let was_completed = self.state.is_completed;

        let state = mem::take(&mut self.state);
        self.state = state.reduce(action, &mut self.rng);

        if restarts {
            self.epoch += 1;
            self.timer = None;
            self.timeline = Timeline {
                started_at: self.state.mode.map(|_| Utc::now()),
                completed_at: None,
            };
        } else if self.state.is_completed && !was_completed {
            self.timeline.completed_at = Some(Utc::now());
        }
    }

    /// Runs one clock tick. Returns whether the clock should keep going.
    fn tick(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch {
            debug!("dropping tick for stale session epoch {}", epoch);
            return false;
        }

        match timer::on_tick(&self.state) {
            Some(action) => {
                self.apply(action);
                true
            }
            None => false,
        }
    }
}

/// Starts, stops or fires the exam clock so that it matches the state.
fn sync_timer(shared: &Arc<Mutex<Inner>>, inner: &mut Inner) {
    let expired = timer::on_expiry(&inner.state);
    if !expired.is_empty() {
        info!(
            "exam time is up, submitting {} questions",
            inner.state.questions.len()
        );
        for action in expired {
            inner.apply(action);
        }
    }

    if !inner.state.is_timed() {
        inner.timer = None;
        return;
    }

    if inner.timer.is_none() {
        debug!(
            "starting exam clock with {}s remaining",
            inner.state.time_remaining
        );
        inner.timer = Some(start_clock(Arc::downgrade(shared), inner.epoch));
    }
}

fn start_clock(shared: Weak<Mutex<Inner>>, epoch: u64) -> TimerHandle {
    timer::every(timer::TICK, move || {
        let shared = shared.clone();
        async move {
            let shared = match shared.upgrade() {
                Some(shared) => shared,
                None => return false,
            };

            let mut inner = shared.lock().await;
            let running = inner.tick(epoch);
            if running {
                sync_timer(&shared, &mut inner);
            }
            running && inner.state.is_timed()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnswerValue, ExamConfigPatch, Mode, Question, QuestionKind};
    use std::time::Duration;
    use tokio::time;

    fn bank(len: usize) -> Vec<Question> {
        (0..len)
            .map(|i| Question {
                id: format!("q{}", i),
                text: format!("question {}", i),
                kind: QuestionKind::Input,
                options: Vec::new(),
                answer: "x".into(),
                explanation: String::new(),
                hints: Vec::new(),
                tags: Vec::new(),
            })
            .collect()
    }

    fn store() -> QuizStore {
        QuizStore::with_rng(ExamConfig::default(), StdRng::seed_from_u64(3))
    }

    fn start_exam(minutes: u64) -> Action {
        Action::StartQuiz {
            questions: bank(4),
            mode: Mode::Exam,
            config: Some(ExamConfigPatch {
                total_questions: Some(4),
                duration_minutes: Some(minutes),
            }),
        }
    }

    #[tokio::test]
    async fn snapshot_before_start_is_empty() {
        let store = store();
        let state = store.snapshot().await;

        assert!(state.questions.is_empty());
        assert!(!state.is_active);
        assert!(!state.is_completed);
        assert_eq!(state.mode, None);
        assert_eq!(store.timeline().await, Timeline::default());
    }

    #[tokio::test(start_paused = true)]
    async fn one_minute_exam_completes_after_sixty_ticks() {
        let store = store();
        store.dispatch(start_exam(1)).await;
        store
            .dispatch(Action::SelectAnswer {
                question_id: "q0".into(),
                value: AnswerValue::from("X"),
            })
            .await;
        assert!(store.has_timer().await);

        time::sleep(Duration::from_millis(59_500)).await;
        let state = store.snapshot().await;
        assert_eq!(state.time_remaining, 1);
        assert!(state.is_active);

        time::sleep(Duration::from_secs(1)).await;
        let state = store.snapshot().await;
        assert_eq!(state.time_remaining, 0);
        assert_eq!(state.mode, Some(Mode::Summary));
        assert!(state.is_completed);
        assert!(!state.is_active);
        assert_eq!(state.score, 1);
        assert_eq!(state.answers.len(), 4);
        assert_eq!(
            state.answers.values().filter(|a| a.is_correct == Some(false)).count(),
            3
        );
        assert!(!store.has_timer().await);
        assert!(store.timeline().await.completed_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_the_clock() {
        let store = store();
        store.dispatch(start_exam(1)).await;
        time::sleep(Duration::from_millis(5_500)).await;
        assert_eq!(store.snapshot().await.time_remaining, 55);

        store.dispatch(Action::ResetQuiz).await;
        assert!(!store.has_timer().await);

        time::sleep(Duration::from_secs(120)).await;
        let state = store.snapshot().await;
        assert_eq!(state.time_remaining, 0);
        assert_eq!(state.mode, None);
        assert!(!state.is_completed);
    }

    #[tokio::test(start_paused = true)]
    async fn completing_early_stops_the_clock() {
        let store = store();
        store.dispatch(start_exam(1)).await;
        time::sleep(Duration::from_millis(2_500)).await;

        let state = store
            .dispatch_all(vec![Action::SubmitAllAnswers, Action::CompleteQuiz])
            .await;
        assert_eq!(state.time_remaining, 58);
        assert!(!store.has_timer().await);

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.snapshot().await.time_remaining, 58);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_the_clock() {
        let store = store();
        store.dispatch(start_exam(1)).await;
        time::sleep(Duration::from_millis(10_500)).await;

        store.dispatch(start_exam(2)).await;
        time::sleep(Duration::from_millis(1_500)).await;

        // A leftover clock would have ticked twice by now.
        assert_eq!(store.snapshot().await.time_remaining, 119);
    }

    #[tokio::test(start_paused = true)]
    async fn practice_has_no_clock() {
        let store = store();
        store
            .dispatch(Action::StartQuiz {
                questions: bank(2),
                mode: Mode::Practice,
                config: None,
            })
            .await;
        assert!(!store.has_timer().await);

        time::sleep(Duration::from_secs(5)).await;
        let state = store.snapshot().await;
        assert_eq!(state.time_remaining, 0);
        assert!(state.is_active);
    }

    #[tokio::test]
    async fn zero_minute_exam_completes_on_start() {
        let store = store();
        let state = store.dispatch(start_exam(0)).await;

        assert_eq!(state.mode, Some(Mode::Summary));
        assert!(state.is_completed);
        assert_eq!(state.answers.len(), 4);
        assert!(!store.has_timer().await);
    }

    #[tokio::test]
    async fn stores_are_independent() {
        let first = store();
        let second = store();

        first
            .dispatch(Action::StartQuiz {
                questions: bank(2),
                mode: Mode::Practice,
                config: None,
            })
            .await;

        assert!(first.snapshot().await.is_active);
        assert!(!second.snapshot().await.is_active);
        assert!(first.timeline().await.started_at.is_some());
        assert!(second.timeline().await.started_at.is_none());
    }
}
