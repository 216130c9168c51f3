use anyhow::{Context, Error, Result};
use chrono::{Duration, Utc};
use log::{error, info, warn};
use rand::prelude::*;
use ring::{digest, hmac};
use serde::{Deserialize, Serialize};
use std::{convert::Infallible, env, net::SocketAddr, time};
use tokio::fs;
use warp::{
    http::StatusCode,
    reject,
    reply::{self, Reply, Response},
    Filter, Rejection,
};

use controllers::{QuizController, Refusal};
use models::{
    AnswerValue, Config, ExamConfig, ExamConfigPatch, Mode, QuestionKind, SessionId,
};
use report::{Progress, Summary, TimerView};
use session::QuizState;
use store::QuizStore;

mod controllers;
mod filters;
mod matching;
mod models;
mod report;
mod session;
mod store;
mod timer;

const EVICTION_PERIOD: time::Duration = time::Duration::from_secs(60);

#[derive(Clone, Debug, Serialize)]
struct QuestionReply<'a> {
    id: &'a str,
    text: &'a str,
    #[serde(rename = "type")]
    kind: QuestionKind,
    options: &'a [String],
    hint_count: usize,
}

#[derive(Clone, Debug, Serialize)]
struct AnswerReply<'a> {
    value: &'a AnswerValue,
    is_correct: Option<bool>,
    explanation: Option<&'a str>,
    correct_answer: Option<&'a AnswerValue>,
}

#[derive(Clone, Debug, Serialize)]
struct QuizReply<'a> {
    mode: Option<Mode>,
    is_active: bool,
    is_completed: bool,
    current_index: usize,
    score: usize,
    question: Option<QuestionReply<'a>>,
    answer: Option<AnswerReply<'a>>,
    progress: Progress,
    timer: Option<TimerView>,
    exam_config: ExamConfig,
    token: &'a str,
}

impl<'a> QuizReply<'a> {
    fn new(state: &'a QuizState, token: &'a str) -> QuizReply<'a> {
        let question = state.current_question();

        // The canonical answer is only revealed once the user's answer has
        // been evaluated.
        let answer = question
            .and_then(|question| {
                state
                    .answers
                    .get(&question.id)
                    .map(|answer| (question, answer))
            })
            .map(|(question, answer)| {
                let evaluated = answer.is_correct.is_some();
                AnswerReply {
                    value: &answer.value,
                    is_correct: answer.is_correct,
                    explanation: Some(question.explanation.as_str()).filter(|_| evaluated),
                    correct_answer: Some(&question.answer).filter(|_| evaluated),
                }
            });

        QuizReply {
            mode: state.mode,
            is_active: state.is_active,
            is_completed: state.is_completed,
            current_index: state.current_index,
            score: state.score,
            question: question.map(|question| QuestionReply {
                id: &question.id,
                text: &question.text,
                kind: question.kind,
                options: &question.options,
                hint_count: question.hints.len(),
            }),
            answer,
            progress: Progress::new(state),
            timer: TimerView::new(state),
            exam_config: state.exam_config,
            token,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct StartRequest {
    mode: Mode,
    #[serde(default)]
    config: Option<ExamConfigPatch>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct AnswerRequest {
    question_id: String,
    answer: AnswerValue,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct SubmitRequest {
    question_id: String,
    #[serde(default)]
    answer: Option<AnswerValue>,
}

#[derive(Clone, Debug, Serialize)]
struct SubmitReply<'a> {
    is_correct: bool,
    score: usize,
    explanation: &'a str,
    correct_answer: &'a AnswerValue,
    token: &'a str,
}

#[derive(Clone, Debug, Serialize)]
struct CheckReply<'a> {
    is_correct: bool,
    token: &'a str,
}

#[derive(Clone, Debug, Serialize)]
struct HintsReply<'a> {
    question_id: &'a str,
    hints: &'a [String],
    token: &'a str,
}

#[derive(Clone, Debug, Serialize)]
struct SummaryReply<'a> {
    #[serde(flatten)]
    summary: Summary,
    token: &'a str,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct ErrorReply {
    error: ErrorCode,
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
enum ErrorCode {
    NotFound,
    NotActive,
    PracticeOnly,
    NoAnswer,
    InvalidMode,
    BadRequest,
    Unauthorized,
    MethodNotAllowed,
    Internal,
}

impl ErrorCode {
    fn status(self) -> StatusCode {
        match self {
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::NotActive | ErrorCode::PracticeOnly => StatusCode::CONFLICT,
            ErrorCode::NoAnswer | ErrorCode::InvalidMode | ErrorCode::BadRequest => {
                StatusCode::BAD_REQUEST
            }
            ErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            ErrorCode::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn reply(self) -> Response {
        reply::with_status(reply::json(&ErrorReply { error: self }), self.status()).into_response()
    }
}

impl From<Refusal> for ErrorCode {
    fn from(refusal: Refusal) -> Self {
        match refusal {
            Refusal::NotActive => ErrorCode::NotActive,
            Refusal::PracticeOnly => ErrorCode::PracticeOnly,
            Refusal::UnknownQuestion => ErrorCode::NotFound,
            Refusal::NoAnswer => ErrorCode::NoAnswer,
            Refusal::InvalidMode => ErrorCode::InvalidMode,
        }
    }
}

fn token_for(quiz_controller: &QuizController, id: &SessionId) -> Result<String, Rejection> {
    quiz_controller.encode_token(id).map_err(|err| {
        error!("couldn't encode token for session {}: {}", id, err);
        reject::custom(filters::Internal)
    })
}

fn state_reply(outcome: Result<QuizState, Refusal>, token: &str) -> Response {
    match outcome {
        Ok(state) => reply::json(&QuizReply::new(&state, token)).into_response(),
        Err(refusal) => ErrorCode::from(refusal).reply(),
    }
}

async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    let code = if err.is_not_found() {
        ErrorCode::NotFound
    } else if err.find::<filters::Unauthorized>().is_some() {
        ErrorCode::Unauthorized
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        ErrorCode::BadRequest
    } else if err.find::<reject::MethodNotAllowed>().is_some() {
        ErrorCode::MethodNotAllowed
    } else {
        if err.find::<filters::Internal>().is_none() {
            warn!("unhandled rejection: {:?}", err);
        }
        ErrorCode::Internal
    };

    Ok(code.reply())
}

fn routes(
    quiz_controller: QuizController,
    cors_origin: &str,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let get_quiz = warp::path!("quiz")
        .and(warp::get())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |(id, store): (SessionId, QuizStore), quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let state = store.snapshot().await;
                Ok::<_, Rejection>(reply::json(&QuizReply::new(&state, &token)).into_response())
            },
        );

    let start_quiz = warp::path!("quiz" / "start")
        .and(warp::post())
        .and(warp::body::json())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |body: StartRequest,
             (id, store): (SessionId, QuizStore),
             quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let outcome = quiz_controller.start(&store, body.mode, body.config).await;
                Ok::<_, Rejection>(state_reply(outcome, &token))
            },
        );

    let select_answer = warp::path!("quiz" / "answer")
        .and(warp::post())
        .and(warp::body::json())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |body: AnswerRequest,
             (id, store): (SessionId, QuizStore),
             quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let outcome = quiz_controller
                    .select_answer(&store, body.question_id, body.answer)
                    .await;
                Ok::<_, Rejection>(state_reply(outcome, &token))
            },
        );

    let submit_answer = warp::path!("quiz" / "submit")
        .and(warp::post())
        .and(warp::body::json())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |body: SubmitRequest,
             (id, store): (SessionId, QuizStore),
             quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let question_id = body.question_id;
                let outcome = quiz_controller
                    .submit_and_show(&store, question_id.clone(), body.answer)
                    .await;

                let state = match outcome {
                    Ok(state) => state,
                    Err(refusal) => return Ok(ErrorCode::from(refusal).reply()),
                };

                let evaluated = state.question(&question_id).and_then(|question| {
                    state
                        .answers
                        .get(&question_id)
                        .and_then(|answer| answer.is_correct)
                        .map(|is_correct| (question, is_correct))
                });

                let response = match evaluated {
                    None => ErrorCode::NoAnswer.reply(),
                    Some((question, is_correct)) => reply::json(&SubmitReply {
                        is_correct,
                        score: state.score,
                        explanation: &question.explanation,
                        correct_answer: &question.answer,
                        token: &token,
                    })
                    .into_response(),
                };

                Ok::<_, Rejection>(response)
            },
        );

    let check_answer = warp::path!("quiz" / "check")
        .and(warp::post())
        .and(warp::body::json())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |body: AnswerRequest,
             (id, store): (SessionId, QuizStore),
             quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let response = match quiz_controller
                    .check_answer(&store, &body.question_id, &body.answer)
                    .await
                {
                    Ok(is_correct) => reply::json(&CheckReply {
                        is_correct,
                        token: &token,
                    })
                    .into_response(),
                    Err(refusal) => ErrorCode::from(refusal).reply(),
                };

                Ok::<_, Rejection>(response)
            },
        );

    let next_question = warp::path!("quiz" / "next")
        .and(warp::post())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |(id, store): (SessionId, QuizStore), quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let outcome = quiz_controller.next_question(&store).await;
                Ok::<_, Rejection>(state_reply(outcome, &token))
            },
        );

    let prev_question = warp::path!("quiz" / "prev")
        .and(warp::post())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |(id, store): (SessionId, QuizStore), quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let outcome = quiz_controller.prev_question(&store).await;
                Ok::<_, Rejection>(state_reply(outcome, &token))
            },
        );

    let finish_quiz = warp::path!("quiz" / "finish")
        .and(warp::post())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |(id, store): (SessionId, QuizStore), quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let outcome = quiz_controller.finish(&store).await;
                Ok::<_, Rejection>(state_reply(outcome, &token))
            },
        );

    let reset_quiz = warp::path!("quiz" / "reset")
        .and(warp::post())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |(id, store): (SessionId, QuizStore), quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let state = quiz_controller.reset(&store).await;
                Ok::<_, Rejection>(state_reply(Ok(state), &token))
            },
        );

    let hints = warp::path!("quiz" / "hints")
        .and(warp::get())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |(id, store): (SessionId, QuizStore), quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let state = store.snapshot().await;

                let response = match state.current_question() {
                    Some(question) if state.is_active => reply::json(&HintsReply {
                        question_id: &question.id,
                        hints: &question.hints,
                        token: &token,
                    })
                    .into_response(),
                    _ => ErrorCode::NotActive.reply(),
                };

                Ok::<_, Rejection>(response)
            },
        );

    let summary = warp::path!("summary")
        .and(warp::get())
        .and(filters::session(quiz_controller.clone()))
        .and(filters::with_quiz_controller(quiz_controller.clone()))
        .and_then(
            |(id, store): (SessionId, QuizStore), quiz_controller: QuizController| async move {
                let token = token_for(&quiz_controller, &id)?;
                let state = store.snapshot().await;

                if state.questions.is_empty() {
                    return Ok(ErrorCode::NotFound.reply());
                }

                let timeline = store.timeline().await;
                let reply = SummaryReply {
                    summary: Summary::new(&state, &timeline),
                    token: &token,
                };

                Ok::<_, Rejection>(reply::json(&reply).into_response())
            },
        );

    let cors = warp::cors()
        .allow_origin(cors_origin)
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["Authorization", "Content-Type"]);

    get_quiz
        .or(start_quiz)
        .unify()
        .or(select_answer)
        .unify()
        .or(submit_answer)
        .unify()
        .or(check_answer)
        .unify()
        .or(next_question)
        .unify()
        .or(prev_question)
        .unify()
        .or(finish_quiz)
        .unify()
        .or(reset_quiz)
        .unify()
        .or(hints)
        .unify()
        .or(summary)
        .unify()
        .with(cors)
        .recover(handle_rejection)
        .with(warp::log("cert_quiz"))
}

#[tokio::main]
async fn main() -> Result<()> {
    pretty_env_logger::init();

    let bind_addr = env::var("BIND").unwrap_or_else(|_err| "127.0.0.1:3030".into());
    let bind_addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("invalid BIND address {:?}", bind_addr))?;

    let cors_origin = env::var("CORS_ORIGIN").unwrap_or_else(|_err| "http://localhost:3000".into());

    let secret_key = env::var("SECRET_KEY")
        .map_err(|err| Error::new(err))
        .and_then(|env| {
            let mut secret_key = [0u8; digest::SHA256_OUTPUT_LEN];
            hex::decode_to_slice(env, &mut secret_key)?;
            Ok(secret_key)
        })
        .or_else(|_err| -> Result<_> {
            let mut secret_key = [0u8; digest::SHA256_OUTPUT_LEN];
            rand::rngs::OsRng.fill(&mut secret_key);

            warn!("No secret key was specified, generated a new secret key.");
            warn!("Rerun with SECRET_KEY={}", hex::encode(secret_key));

            Ok(secret_key)
        })?;

    let secret_key = hmac::Key::new(hmac::HMAC_SHA256, secret_key.as_ref());

    let config_path = env::var("QUIZ_CONFIG").unwrap_or_else(|_err| "quiz.toml".into());
    let config = fs::read_to_string(&config_path)
        .await
        .with_context(|| format!("couldn't read {}", config_path))?;
    let config: Config = toml::de::from_str(&config)
        .with_context(|| format!("couldn't parse {}", config_path))?;
    config.validate()?;

    let exam_config = ExamConfig::default().merge(&config.exam);
    info!(
        "loaded {} questions from {}, exams are {} questions in {} minutes",
        config.questions.len(),
        config_path,
        exam_config.total_questions,
        exam_config.duration_minutes
    );

    let idle_minutes = env::var("SESSION_IDLE_MINUTES")
        .ok()
        .map(|minutes| minutes.parse::<i64>())
        .transpose()
        .context("invalid SESSION_IDLE_MINUTES")?
        .unwrap_or(60);

    let quiz_controller = QuizController::new(secret_key, config.questions.iter(), exam_config);

    let evictor = quiz_controller.clone();
    let max_idle = Duration::minutes(idle_minutes);
    let _eviction = timer::every(EVICTION_PERIOD, move || {
        let evictor = evictor.clone();
        async move {
            if let Err(err) = evictor.evict_idle(Utc::now(), max_idle).await {
                error!("couldn't evict idle sessions: {}", err);
            }
            true
        }
    });

    info!("listening on {}", bind_addr);
    warp::serve(routes(quiz_controller, &cors_origin))
        .run(bind_addr)
        .await;

    Ok(())
}
