use log::error;
use warp::{
    reject::{self, Reject},
    Filter,
};

use crate::controllers::QuizController;
use crate::models::SessionId;
use crate::store::QuizStore;

#[derive(Debug)]
pub struct Unauthorized;

impl Reject for Unauthorized {}

#[derive(Debug)]
pub struct Internal;

impl Reject for Internal {}

pub fn with_quiz_controller(
    quiz_controller: QuizController,
) -> impl Filter<Extract = (QuizController,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || quiz_controller.clone())
}

/// Resolves the caller's session from `Authorization: Session <token>`,
/// creating a fresh one when the header is missing.
pub fn session(
    quiz_controller: QuizController,
) -> impl Filter<Extract = ((SessionId, QuizStore),), Error = warp::Rejection> + Clone {
    warp::header::optional("Authorization")
        .and(with_quiz_controller(quiz_controller))
        .and_then(
            move |auth: Option<String>, quiz_controller: QuizController| async move {
                match auth {
                    None => quiz_controller.create_session().map_err(|err| {
                        error!("couldn't create session: {}", err);
                        reject::custom(Internal)
                    }),
                    Some(auth) => {
                        let mut parts = auth.splitn(2, ' ');
                        let kind = parts.next().ok_or_else(|| reject::custom(Unauthorized))?;
                        let value = parts.next().ok_or_else(|| reject::custom(Unauthorized))?;

                        if !kind.eq_ignore_ascii_case("session") {
                            return Err(reject::custom(Unauthorized));
                        }

                        let id = quiz_controller
                            .decode_token(value)
                            .map_err(|_err| reject::custom(Unauthorized))?;

                        match quiz_controller.store(&id) {
                            Ok(Some(store)) => Ok((id, store)),
                            Ok(None) => Err(reject::custom(Unauthorized)),
                            Err(err) => {
                                error!("couldn't look up session {}: {}", id, err);
                                Err(reject::custom(Internal))
                            }
                        }
                    }
                }
            },
        )
}
