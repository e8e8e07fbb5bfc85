//! Question progression engine: quiz start, question dispatch, timer
//! expiry, answer grading and creator-gated advancement.
//!
//! Every mutating entry point here runs inside the hub dispatcher, which
//! serializes control events per process; the cache and session store are
//! consulted without holding any hub lock.

use std::time::Duration;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::{
        models::{AnswerRecord, SessionStatus},
        quiz_cache::{
            self, QUESTION_START_TTL, QUIZ_DATA_TTL, current_index_key, quiz_data_key,
        },
    },
    dto::{
        now_millis,
        quiz::{InstanceStatus, LeaderboardEntry, QuestionSpec, QuizData, QuizType},
        ws::{
            AnswerPayload, AnswerResultPayload, LeaderboardPayload, QuestionPayload, QuestionView,
            QuizFinishedPayload, QuizStartedPayload, ServerMessage, TimeExpiredPayload,
            WaitingForCreatorPayload,
        },
    },
    error::ServiceError,
    state::{
        SharedState,
        hub::{ClientHandle, HubCommand, TimerKey},
    },
};

/// Pause between an async answer (or expiry) and the next question.
const ASYNC_ADVANCE_DELAY: Duration = Duration::from_millis(200);

/// Load the cached quiz payload for an instance.
pub async fn load_quiz_data(
    state: &SharedState,
    instance_id: Uuid,
) -> Result<QuizData, ServiceError> {
    let cached = state
        .cache()
        .get(quiz_data_key(instance_id))
        .await
        .map_err(|err| ServiceError::Upstream(err.to_string()))?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("no cached quiz data for instance `{instance_id}`"))
        })?;

    serde_json::from_str(&cached)
        .map_err(|err| ServiceError::Internal(format!("corrupt cached quiz data: {err}")))
}

/// `start_quiz` from the creator: mark the instance active and dispatch the
/// first question.
pub async fn handle_start_quiz(state: &SharedState, client: &ClientHandle) {
    // The catalog owns the instance status; starting is a one-way
    // transition, so a replayed start_quiz frame must not restart a live or
    // finished run.
    let instance_status = match state
        .catalog()
        .get_instance(client.instance_id, client.user_id)
        .await
    {
        Ok(bundle) => bundle.instance.status,
        Err(err) => {
            warn!(instance_id = %client.instance_id, error = %err, "failed to read instance status for start");
            client.send_error("Failed to start quiz");
            return;
        }
    };

    if !instance_status.may_become(InstanceStatus::Active) {
        let message = match instance_status {
            InstanceStatus::Finished => "Quiz has already finished",
            _ => "Quiz has already started",
        };
        client.send_error(message);
        return;
    }

    let quiz = match load_quiz_data(state, client.instance_id).await {
        Ok(quiz) => quiz,
        Err(err) => {
            warn!(instance_id = %client.instance_id, error = %err, "failed to load quiz data for start");
            client.send_error("Failed to start quiz");
            return;
        }
    };

    let store = match state.require_session_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(error = %err, "session store unavailable for start");
            client.send_error("Failed to start quiz");
            return;
        }
    };

    if let Err(err) = store
        .update_status(
            client.instance_id,
            client.user_id,
            SessionStatus::InProgress,
        )
        .await
    {
        warn!(user_id = %client.user_id, error = %err, "failed to update creator session status");
    }

    if let Err(err) = state
        .catalog()
        .update_instance_status(client.instance_id, InstanceStatus::Active)
        .await
    {
        warn!(instance_id = %client.instance_id, error = %err, "failed to mark instance active");
    }

    match quiz.quiz_type {
        QuizType::Sync => {
            state.hub().broadcast_to_instance(
                client.instance_id,
                ServerMessage::QuizStarted(QuizStartedPayload {
                    quiz_type: quiz.quiz_type,
                }),
            );

            for participant in state
                .hub()
                .instance_clients(client.instance_id)
                .into_iter()
                .filter(|connection| !connection.is_creator)
            {
                if let Err(err) = store
                    .update_status(
                        client.instance_id,
                        participant.user_id,
                        SessionStatus::InProgress,
                    )
                    .await
                {
                    warn!(user_id = %participant.user_id, error = %err, "failed to update participant session status");
                }
                send_question(state, &participant, &quiz, 0).await;
            }

            notify_creator_progress(state, client.instance_id, quiz.creator_id, 0).await;
        }
        QuizType::Async => {
            // Participants progress individually from their own join/resume;
            // the creator only observes and never receives questions.
            client.send(ServerMessage::QuizStarted(QuizStartedPayload {
                quiz_type: quiz.quiz_type,
            }));
        }
    }
}

/// Dispatch question `question_index` to one client, or finish the quiz for
/// it when the index is past the last question.
pub async fn send_question(
    state: &SharedState,
    client: &ClientHandle,
    quiz: &QuizData,
    question_index: usize,
) {
    let Some(question) = quiz.questions.get(question_index) else {
        finish_quiz(state, client).await;
        return;
    };

    let start_key = question_start_key_for(quiz.quiz_type, client, question_index);
    let now = now_millis();

    if let Err(err) = state
        .cache()
        .set_nx(start_key.clone(), now.to_string(), QUESTION_START_TTL)
        .await
    {
        warn!(key = %start_key, error = %err, "failed to record question start");
    }

    // The stored value is the canonical start for this exposure, shared by
    // every participant in sync mode and surviving reconnects.
    let started_at = read_question_start(state, &start_key).await.unwrap_or(now);

    let mut remaining_ms = 0i64;
    if question.time_limit_sec > 0 {
        remaining_ms = (i64::from(question.time_limit_sec) * 1000 - (now - started_at)).max(0);
    }

    let payload = QuestionPayload {
        question: question_view(question),
        question_index,
        total_questions: quiz.questions.len(),
        time_limit_ms: (question.time_limit_sec > 0).then_some(remaining_ms),
        server_time: now,
    };

    match quiz.quiz_type {
        QuizType::Sync if client.is_creator => {
            // The creator drives sync progression but never sees questions.
        }
        _ => client.send(ServerMessage::Question(payload)),
    }

    if question.time_limit_sec > 0 && remaining_ms > 0 {
        let key = timer_key_for(quiz.quiz_type, client, question_index);
        let timer_state = state.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(remaining_ms as u64)).await;
            timer_state
                .hub()
                .dispatch(HubCommand::QuestionTimeout { key });
        });
        state.hub().install_timer(key, handle);
    }
}

/// Expiry of a question timer. The timer table entry is the advancement
/// latch: when another path already advanced this question, the entry is
/// gone and the expiry is a no-op.
pub async fn handle_question_timeout(state: &SharedState, key: TimerKey) {
    if !state.hub().take_timer(key) {
        return;
    }

    let quiz = match load_quiz_data(state, key.instance_id).await {
        Ok(quiz) => quiz,
        Err(err) => {
            warn!(instance_id = %key.instance_id, error = %err, "failed to load quiz data on timeout");
            return;
        }
    };

    match key.user_id {
        None => {
            state.hub().broadcast_to_participants(
                key.instance_id,
                ServerMessage::TimeExpired(TimeExpiredPayload {
                    question_index: key.question_index,
                }),
            );
            show_leaderboard_and_wait(state, key.instance_id, quiz.creator_id, key.question_index)
                .await;
        }
        Some(user_id) => {
            let Some(client) = state
                .hub()
                .instance_clients(key.instance_id)
                .into_iter()
                .find(|connection| connection.user_id == user_id && !connection.is_creator)
            else {
                return;
            };

            client.send(ServerMessage::TimeExpired(TimeExpiredPayload {
                question_index: key.question_index,
            }));
            schedule_question(state, client, key.question_index + 1);
        }
    }
}

/// Grade a submitted answer and advance the session.
pub async fn handle_answer(state: &SharedState, client: &ClientHandle, payload: Value) {
    let answer: AnswerPayload = match serde_json::from_value(payload) {
        Ok(parsed) => parsed,
        Err(_) => {
            client.send_error("Invalid answer format");
            return;
        }
    };

    let quiz = match load_quiz_data(state, client.instance_id).await {
        Ok(quiz) => quiz,
        Err(err) => {
            warn!(instance_id = %client.instance_id, error = %err, "failed to load quiz data for answer");
            client.send_error("Failed to process answer");
            return;
        }
    };

    // Resolve the question by id; the client's notion of the index is never
    // trusted.
    let Some((question_index, question)) = quiz.question_by_id(&answer.question_id) else {
        client.send_error("Question not found");
        return;
    };

    let store = match state.require_session_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(error = %err, "session store unavailable for answer");
            client.send_error("Failed to save answer");
            return;
        }
    };

    let mut session = match store.find(client.instance_id, client.user_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            client.send_error("Failed to save answer");
            return;
        }
        Err(err) => {
            warn!(user_id = %client.user_id, error = %err, "failed to load session for answer");
            client.send_error("Failed to save answer");
            return;
        }
    };

    // Re-submissions for an already-answered question must not double-score.
    if session.current_question_index > question_index {
        client.send_error("Question not found");
        return;
    }

    let start_key = question_start_key_for(quiz.quiz_type, client, question_index);
    let now = now_millis();
    let started_at = read_question_start(state, &start_key).await.unwrap_or(now);
    let time_spent_ms = (now - started_at).max(0);

    let time_limit_ms = i64::from(question.time_limit_sec) * 1000;
    if question.time_limit_sec > 0 && time_spent_ms > time_limit_ms {
        client.send_error("Time limit exceeded");
        return;
    }

    let is_correct = super::scoring::answer_matches(&answer.answer, &question.correct_answer);
    let score = if is_correct {
        super::scoring::calculate_score(question.max_score, time_spent_ms, time_limit_ms)
    } else {
        0
    };

    session.answers.push(AnswerRecord {
        question_id: answer.question_id.clone(),
        answer: answer.answer.clone(),
        is_correct,
        score,
        time_spent_ms,
    });
    session.score += score;
    session.current_question_index = question_index + 1;

    if let Err(err) = store.update(session.clone()).await {
        warn!(user_id = %client.user_id, error = %err, "failed to persist answer");
        client.send_error("Failed to save answer");
        return;
    }

    client.send(ServerMessage::AnswerResult(AnswerResultPayload {
        is_correct,
        score,
        time_spent_ms,
        total_score: session.score,
    }));

    match quiz.quiz_type {
        QuizType::Sync => {
            let sessions = match store.list_by_instance(client.instance_id).await {
                Ok(sessions) => sessions,
                Err(err) => {
                    warn!(instance_id = %client.instance_id, error = %err, "failed to list sessions after answer");
                    return;
                }
            };

            state.hub().broadcast_to_instance(
                client.instance_id,
                ServerMessage::Leaderboard(LeaderboardPayload {
                    leaderboard: super::scoring::leaderboard(&sessions, quiz.creator_id),
                }),
            );

            let progress =
                super::scoring::question_progress(&sessions, quiz.creator_id, question_index);
            if progress.all_answered() {
                state
                    .hub()
                    .take_timer(TimerKey::sync(client.instance_id, question_index));
                show_leaderboard_and_wait(state, client.instance_id, quiz.creator_id, question_index)
                    .await;
            } else {
                notify_creator_progress(state, client.instance_id, quiz.creator_id, question_index)
                    .await;
            }
        }
        QuizType::Async => {
            state.hub().take_timer(TimerKey::per_user(
                client.instance_id,
                client.user_id,
                question_index,
            ));
            schedule_question(state, client.clone(), question_index + 1);
        }
    }
}

/// `continue` from the creator: advance the instance to the slowest
/// participant's next question, or finish the quiz past the last one.
pub async fn handle_continue(state: &SharedState, client: &ClientHandle) {
    let quiz = match load_quiz_data(state, client.instance_id).await {
        Ok(quiz) => quiz,
        Err(err) => {
            warn!(instance_id = %client.instance_id, error = %err, "failed to load quiz data for continue");
            client.send_error("Failed to continue");
            return;
        }
    };

    let store = match state.require_session_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(error = %err, "session store unavailable for continue");
            client.send_error("Failed to continue");
            return;
        }
    };

    let sessions = match store.list_by_instance(client.instance_id).await {
        Ok(sessions) if sessions.is_empty() => {
            client.send_error("No active sessions");
            return;
        }
        Ok(sessions) => sessions,
        Err(err) => {
            warn!(instance_id = %client.instance_id, error = %err, "failed to list sessions for continue");
            client.send_error("Failed to continue");
            return;
        }
    };

    // The slowest participant defines the next question; the creator's own
    // session never takes part.
    let next_index = sessions
        .iter()
        .filter(|session| session.user_id != quiz.creator_id)
        .map(|session| session.current_question_index)
        .min()
        .unwrap_or(0);

    // Whatever question was running is superseded by this advancement.
    let prior_index = current_sync_index(state, client.instance_id).await;
    state
        .hub()
        .take_timer(TimerKey::sync(client.instance_id, prior_index));

    if next_index >= quiz.questions.len() {
        // A repeated continue past the end finds the instance already
        // finished; the status write is one-way and is not re-issued.
        let instance_status = match state
            .catalog()
            .get_instance(client.instance_id, client.user_id)
            .await
        {
            Ok(bundle) => Some(bundle.instance.status),
            Err(err) => {
                warn!(instance_id = %client.instance_id, error = %err, "failed to read instance status before finish");
                None
            }
        };

        if instance_status.map_or(true, |status| status.may_become(InstanceStatus::Finished))
            && let Err(err) = state
                .catalog()
                .update_instance_status(client.instance_id, InstanceStatus::Finished)
                .await
        {
            warn!(instance_id = %client.instance_id, error = %err, "failed to mark instance finished");
        }

        for connection in state.hub().instance_clients(client.instance_id) {
            finish_quiz(state, &connection).await;
        }
        return;
    }

    if quiz.quiz_type == QuizType::Sync
        && let Err(err) = state
            .cache()
            .set(
                current_index_key(client.instance_id),
                next_index.to_string(),
                QUIZ_DATA_TTL,
            )
            .await
    {
        warn!(instance_id = %client.instance_id, error = %err, "failed to record current index");
    }

    for participant in state
        .hub()
        .instance_clients(client.instance_id)
        .into_iter()
        .filter(|connection| !connection.is_creator)
    {
        send_question(state, &participant, &quiz, next_index).await;
    }
    notify_creator_progress(state, client.instance_id, quiz.creator_id, next_index).await;
}

/// Finalize one client's session and deliver its result. A session that is
/// already finished is left untouched, which makes a duplicate `continue`
/// on the last question a no-op.
pub async fn finish_quiz(state: &SharedState, client: &ClientHandle) {
    let store = match state.require_session_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(error = %err, "session store unavailable for finish");
            client.send_error("Failed to finish quiz");
            return;
        }
    };

    let mut session = match store.find(client.instance_id, client.user_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            client.send_error("Failed to finish quiz");
            return;
        }
        Err(err) => {
            warn!(user_id = %client.user_id, error = %err, "failed to load session for finish");
            client.send_error("Failed to finish quiz");
            return;
        }
    };

    if session.status == SessionStatus::Finished {
        return;
    }

    session.status = SessionStatus::Finished;
    session.finished_at = Some(time::OffsetDateTime::now_utc());

    if let Err(err) = store.update(session.clone()).await {
        warn!(user_id = %client.user_id, error = %err, "failed to persist finished session");
    }

    let creator_id = match load_quiz_data(state, client.instance_id).await {
        Ok(quiz) => quiz.creator_id,
        Err(err) => {
            warn!(instance_id = %client.instance_id, error = %err, "failed to load quiz data for finish");
            client.send(ServerMessage::QuizFinished(QuizFinishedPayload {
                final_score: session.score,
                rank: 0,
            }));
            return;
        }
    };

    let leaderboard = load_leaderboard(state, client.instance_id, creator_id).await;
    let rank = leaderboard
        .iter()
        .find(|entry| entry.user_id == client.user_id)
        .map(|entry| entry.rank)
        .unwrap_or(0);

    client.send(ServerMessage::QuizFinished(QuizFinishedPayload {
        final_score: session.score,
        rank,
    }));
}

/// Broadcast the post-question leaderboard and park participants until the
/// creator continues.
pub async fn show_leaderboard_and_wait(
    state: &SharedState,
    instance_id: Uuid,
    creator_id: Uuid,
    question_index: usize,
) {
    let leaderboard = load_leaderboard(state, instance_id, creator_id).await;

    state.hub().broadcast_to_instance(
        instance_id,
        ServerMessage::Leaderboard(LeaderboardPayload { leaderboard }),
    );
    state.hub().broadcast_to_participants(
        instance_id,
        ServerMessage::WaitingForCreator(WaitingForCreatorPayload {
            question_index,
            reason: Some("All participants answered".to_owned()),
        }),
    );
}

/// Tell the connected creator how far participants are on a question.
pub async fn notify_creator_progress(
    state: &SharedState,
    instance_id: Uuid,
    creator_id: Uuid,
    question_index: usize,
) {
    let Some(creator) = state.hub().find_creator(instance_id) else {
        return;
    };

    let Ok(store) = state.require_session_store().await else {
        return;
    };
    let sessions = match store.list_by_instance(instance_id).await {
        Ok(sessions) => sessions,
        Err(_) => return,
    };

    let progress = super::scoring::question_progress(&sessions, creator_id, question_index);
    creator.send(ServerMessage::WaitingForCreator(WaitingForCreatorPayload {
        question_index,
        reason: Some(format!(
            "Question in progress: {}/{} answered",
            progress.answered, progress.participants
        )),
    }));
}

/// Leaderboard snapshot, degrading to empty when the store is unreachable.
pub async fn load_leaderboard(
    state: &SharedState,
    instance_id: Uuid,
    creator_id: Uuid,
) -> Vec<LeaderboardEntry> {
    let Ok(store) = state.require_session_store().await else {
        return vec![];
    };

    match store.list_by_instance(instance_id).await {
        Ok(sessions) => super::scoring::leaderboard(&sessions, creator_id),
        Err(err) => {
            warn!(instance_id = %instance_id, error = %err, "failed to load sessions for leaderboard");
            vec![]
        }
    }
}

/// Sync current index as advanced by the creator; defaults to 0.
pub async fn current_sync_index(state: &SharedState, instance_id: Uuid) -> usize {
    match state.cache().get(current_index_key(instance_id)).await {
        Ok(Some(raw)) => raw.parse().unwrap_or(0),
        Ok(None) => 0,
        Err(err) => {
            warn!(instance_id = %instance_id, error = %err, "failed to read current index");
            0
        }
    }
}

/// Stored start of a question exposure, if any. Cache failures degrade to
/// absence, which callers treat as "started just now".
pub async fn read_question_start(state: &SharedState, key: &str) -> Option<i64> {
    match state.cache().get(key.to_owned()).await {
        Ok(Some(raw)) => raw.parse().ok(),
        Ok(None) => None,
        Err(err) => {
            warn!(key = %key, error = %err, "failed to read question start");
            None
        }
    }
}

/// Enqueue delivery of `question_index` to one client after the async
/// pacing delay, without stalling the dispatcher.
fn schedule_question(state: &SharedState, client: ClientHandle, question_index: usize) {
    let state = state.clone();
    tokio::spawn(async move {
        tokio::time::sleep(ASYNC_ADVANCE_DELAY).await;
        state.hub().dispatch(HubCommand::SendQuestion {
            client,
            question_index,
        });
    });
}

pub fn question_start_key_for(
    quiz_type: QuizType,
    client: &ClientHandle,
    question_index: usize,
) -> String {
    match quiz_type {
        QuizType::Sync => quiz_cache::question_start_key(client.instance_id, question_index),
        QuizType::Async => quiz_cache::user_question_start_key(
            client.instance_id,
            client.user_id,
            question_index,
        ),
    }
}

pub fn timer_key_for(quiz_type: QuizType, client: &ClientHandle, question_index: usize) -> TimerKey {
    match quiz_type {
        QuizType::Sync => TimerKey::sync(client.instance_id, question_index),
        QuizType::Async => {
            TimerKey::per_user(client.instance_id, client.user_id, question_index)
        }
    }
}

fn question_view(question: &QuestionSpec) -> QuestionView {
    QuestionView {
        id: question.id.clone(),
        text: question.text.clone(),
        kind: question.kind,
        options: question.options.clone(),
        order_index: question.order_index,
        max_score: question.max_score,
        time_limit_sec: question.time_limit_sec,
    }
}
