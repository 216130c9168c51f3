use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rand::prelude::*;
use ring::hmac;
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::models::{AnswerValue, ExamConfig, ExamConfigPatch, Mode, Question, SessionId};
use crate::session::{Action, QuizState};
use crate::store::QuizStore;

/// Why a request was not turned into an action.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Refusal {
    NotActive,
    PracticeOnly,
    UnknownQuestion,
    NoAnswer,
    InvalidMode,
}

#[derive(Clone, Debug)]
struct Session {
    store: QuizStore,
    last_used: DateTime<Utc>,
}

#[derive(Clone, Debug)]
pub struct QuizController {
    secret_key: Arc<hmac::Key>,
    bank: Arc<Vec<Question>>,
    exam_config: ExamConfig,
    sessions: Arc<Mutex<BTreeMap<SessionId, Session>>>,
}

impl QuizController {
    pub fn new<'a>(
        secret_key: hmac::Key,
        bank: impl Iterator<Item = &'a Question>,
        exam_config: ExamConfig,
    ) -> QuizController {
        QuizController {
            secret_key: Arc::new(secret_key),
            bank: Arc::new(bank.cloned().collect()),
            exam_config,
            sessions: Default::default(),
        }
    }

    pub fn create_session(&self) -> Result<(SessionId, QuizStore)> {
        let id = {
            let mut id = [0u8; 16];
            rand::rngs::OsRng.fill(&mut id);
            SessionId(id)
        };

        let store = QuizStore::new(self.exam_config);
        self.lock_sessions()?.insert(
            id,
            Session {
                store: store.clone(),
                last_used: Utc::now(),
            },
        );

        info!("created session {}", id);
        Ok((id, store))
    }

    /// Looks up a session and marks it as used.
    pub fn store(&self, id: &SessionId) -> Result<Option<QuizStore>> {
        let mut sessions = self.lock_sessions()?;
        Ok(sessions.get_mut(id).map(|session| {
            session.last_used = Utc::now();
            session.store.clone()
        }))
    }

    /// Forgets sessions that have not been used for longer than `max_idle`.
    /// Exams with a running clock are kept until their time is up.
    pub async fn evict_idle(&self, now: DateTime<Utc>, max_idle: Duration) -> Result<usize> {
        let idle = self
            .lock_sessions()?
            .iter()
            .filter(|(_, session)| now - session.last_used > max_idle)
            .map(|(id, session)| (*id, session.store.clone()))
            .collect::<Vec<_>>();

        let mut expired = Vec::new();
        for (id, store) in idle {
            if store.snapshot().await.is_timed() {
                debug!("keeping idle session {} until its exam ends", id);
            } else {
                expired.push(id);
            }
        }

        let mut sessions = self.lock_sessions()?;
        let before = sessions.len();
        // A session used while we were looking is no longer idle.
        sessions.retain(|id, session| {
            !(expired.contains(id) && now - session.last_used > max_idle)
        });

        let evicted = before - sessions.len();
        if evicted > 0 {
            info!("evicted {} idle sessions, {} left", evicted, sessions.len());
        }
        Ok(evicted)
    }

    fn lock_sessions(&self) -> Result<MutexGuard<'_, BTreeMap<SessionId, Session>>> {
        self.sessions
            .lock()
            .map_err(|_err| anyhow!("couldn't lock sessions"))
    }

    pub fn decode_token(&self, token: &str) -> Result<SessionId> {
        let mut parts = token.splitn(2, ':');
        let id = parts
            .next()
            .ok_or_else(|| anyhow!("bad session token"))?;
        let id = base64::decode_config(id, base64::URL_SAFE_NO_PAD)?;

        let signature = parts
            .next()
            .ok_or_else(|| anyhow!("bad session token"))?;
        let signature = base64::decode_config(signature, base64::URL_SAFE_NO_PAD)?;

        hmac::verify(&self.secret_key, &id, &signature).map_err(|_err| {
            warn!("rejected session token with a bad signature");
            anyhow!("invalid signature")
        })?;

        let id = bincode::deserialize(&id)?;
        Ok(id)
    }

    pub fn encode_token(&self, id: &SessionId) -> Result<String> {
        let id = bincode::serialize(id)?;

        let signature = hmac::sign(&self.secret_key, &id);

        let token = format!(
            "{}:{}",
            base64::encode_config(id, base64::URL_SAFE_NO_PAD),
            base64::encode_config(signature, base64::URL_SAFE_NO_PAD),
        );

        Ok(token)
    }

    pub async fn start(
        &self,
        store: &QuizStore,
        mode: Mode,
        config: Option<ExamConfigPatch>,
    ) -> Result<QuizState, Refusal> {
        if mode == Mode::Summary {
            return Err(Refusal::InvalidMode);
        }

        let state = store
            .dispatch(Action::StartQuiz {
                questions: self.bank.as_ref().clone(),
                mode,
                config,
            })
            .await;

        info!(
            "started {:?} quiz with {} questions",
            mode,
            state.questions.len()
        );
        Ok(state)
    }

    pub async fn select_answer(
        &self,
        store: &QuizStore,
        question_id: String,
        value: AnswerValue,
    ) -> Result<QuizState, Refusal> {
        let state = store.snapshot().await;
        answerable(&state, &question_id)?;

        Ok(store
            .dispatch(Action::SelectAnswer { question_id, value })
            .await)
    }

    /// Records `value`, if given, and evaluates the committed answer.
    pub async fn submit_and_show(
        &self,
        store: &QuizStore,
        question_id: String,
        value: Option<AnswerValue>,
    ) -> Result<QuizState, Refusal> {
        let state = store.snapshot().await;
        answerable(&state, &question_id)?;
        if value.is_none() && !state.answers.contains_key(&question_id) {
            return Err(Refusal::NoAnswer);
        }

        let mut actions = Vec::new();
        if let Some(value) = value {
            actions.push(Action::SelectAnswer {
                question_id: question_id.clone(),
                value,
            });
        }
        actions.push(Action::SubmitAnswer { question_id });

        Ok(store.dispatch_all(actions).await)
    }

    pub async fn check_answer(
        &self,
        store: &QuizStore,
        question_id: &str,
        value: &AnswerValue,
    ) -> Result<bool, Refusal> {
        let state = store.snapshot().await;
        if state.question(question_id).is_none() {
            return Err(Refusal::UnknownQuestion);
        }

        Ok(state.check_answer(question_id, value))
    }

    /// Moves forward, or finishes the quiz from the last question.
    pub async fn next_question(&self, store: &QuizStore) -> Result<QuizState, Refusal> {
        let state = store.snapshot().await;
        if !state.is_active || state.questions.is_empty() {
            return Err(Refusal::NotActive);
        }

        if state.is_last_question() {
            self.finish(store).await
        } else {
            Ok(store.dispatch(Action::NextQuestion).await)
        }
    }

    pub async fn prev_question(&self, store: &QuizStore) -> Result<QuizState, Refusal> {
        let state = store.snapshot().await;
        if !state.is_active || state.questions.is_empty() {
            return Err(Refusal::NotActive);
        }
        if state.mode == Some(Mode::Exam) {
            return Err(Refusal::PracticeOnly);
        }

        Ok(store.dispatch(Action::PrevQuestion).await)
    }

    /// Ends the quiz. Exams are graded in bulk first; unanswered questions
    /// count as wrong.
    pub async fn finish(&self, store: &QuizStore) -> Result<QuizState, Refusal> {
        let state = store.snapshot().await;
        let mut actions = match state.mode {
            None => return Err(Refusal::NotActive),
            Some(Mode::Exam) => vec![Action::SubmitAllAnswers],
            Some(_) => Vec::new(),
        };
        actions.push(Action::CompleteQuiz);

        let state = store.dispatch_all(actions).await;
        info!(
            "quiz finished with {} of {} correct",
            state.score,
            state.questions.len()
        );
        Ok(state)
    }

    pub async fn reset(&self, store: &QuizStore) -> QuizState {
        store.dispatch(Action::ResetQuiz).await
    }
}

fn answerable(state: &QuizState, question_id: &str) -> Result<(), Refusal> {
    if !state.is_active {
        return Err(Refusal::NotActive);
    }
    if state.question(question_id).is_none() {
        return Err(Refusal::UnknownQuestion);
    }
    Ok(())
}
