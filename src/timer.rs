use std::{future::Future, time::Duration};
use tokio::{
    task::JoinHandle,
    time::{self, Instant},
};

use crate::session::{Action, QuizState};

pub const TICK: Duration = Duration::from_secs(1);

/// The action one clock tick dispatches, if the clock should be running.
pub fn on_tick(state: &QuizState) -> Option<Action> {
    if state.is_timed() && state.time_remaining > 0 {
        Some(Action::SetTimeLeft(state.time_remaining - 1))
    } else {
        None
    }
}

/// The actions that close an exam whose time has run out, or nothing if the
/// exam is still running.
pub fn on_expiry(state: &QuizState) -> Vec<Action> {
    if state.is_timed() && state.time_remaining == 0 {
        vec![Action::SubmitAllAnswers, Action::CompleteQuiz]
    } else {
        Vec::new()
    }
}

/// A running periodic task. Dropping the handle stops it.
#[derive(Debug)]
pub struct TimerHandle(JoinHandle<()>);

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Calls `tick` once per `period`, starting one period from now, until it
/// resolves to `false`.
pub fn every<F, Fut>(period: Duration, mut tick: F) -> TimerHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = bool> + Send,
{
    let task = tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        loop {
            interval.tick().await;
            if !tick().await {
                break;
            }
        }
    });

    TimerHandle(task)
}
