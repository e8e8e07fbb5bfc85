//! Join and resume flows for freshly registered clients.

use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{SessionEntity, SessionStatus},
        quiz_cache::{QUIZ_DATA_TTL, quiz_data_key},
    },
    dto::{
        now_millis,
        quiz::{InstanceStatus, QuizData, QuizType},
        ws::{
            ConnectedPayload, LeaderboardPayload, ParticipantAction, ParticipantsUpdatePayload,
            ServerMessage, TimeExpiredPayload, WaitingForCreatorPayload,
        },
    },
    services::progression_service,
    state::{
        SharedState,
        hub::{ClientHandle, HubCommand},
    },
};

/// Delay before a rejected client is unregistered, long enough for the
/// error message to flush through the write pump.
const REJECT_UNREGISTER_DELAY: Duration = Duration::from_millis(500);
/// Grace between the connected handshake and the resume replay.
const RESUME_DELAY: Duration = Duration::from_millis(100);

/// Materialize a newly registered client: fetch the quiz, cache it, upsert
/// the session row and announce the membership change. Late joiners into an
/// active instance get a resume replay after a short grace.
pub async fn handle_join(state: SharedState, client: ClientHandle) {
    info!(user_id = %client.user_id, instance_id = %client.instance_id, "handling join");

    let bundle = match state
        .catalog()
        .get_instance(client.instance_id, client.user_id)
        .await
    {
        Ok(bundle) => bundle,
        Err(err) => {
            warn!(instance_id = %client.instance_id, error = %err, "failed to fetch quiz instance");
            client.send_error("Failed to load quiz");
            schedule_unregister(&state, &client);
            return;
        }
    };

    if bundle.instance.status == InstanceStatus::Finished {
        info!(instance_id = %client.instance_id, user_id = %client.user_id, "rejecting join into finished quiz");
        client.send_error("Quiz has already finished");
        schedule_unregister(&state, &client);
        return;
    }

    let quiz_status = bundle.instance.status;
    let quiz = QuizData {
        quiz_type: bundle.instance.quiz_type,
        creator_id: bundle.instance.creator_id,
        questions: bundle.questions,
        settings: bundle.instance.settings.clone(),
    };

    match serde_json::to_string(&quiz) {
        Ok(encoded) => {
            if let Err(err) = state
                .cache()
                .set(quiz_data_key(client.instance_id), encoded, QUIZ_DATA_TTL)
                .await
            {
                warn!(instance_id = %client.instance_id, error = %err, "failed to cache quiz data");
            }
        }
        Err(err) => {
            warn!(instance_id = %client.instance_id, error = %err, "failed to encode quiz data");
        }
    }

    let store = match state.require_session_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(error = %err, "session store unavailable for join");
            client.send_error("Failed to join quiz");
            return;
        }
    };

    match store.exists(client.instance_id, client.user_id).await {
        Ok(false) => {
            if let Err(err) = store
                .create(SessionEntity::joined(client.instance_id, client.user_id))
                .await
            {
                warn!(user_id = %client.user_id, error = %err, "failed to create session");
                client.send_error("Failed to join quiz");
                return;
            }
        }
        Ok(true) => {}
        Err(err) => {
            warn!(user_id = %client.user_id, error = %err, "failed to check session existence");
            client.send_error("Failed to join quiz");
            return;
        }
    }

    client.send(ServerMessage::Connected(ConnectedPayload {
        session_id: format!("{}:{}", client.instance_id, client.user_id),
        quiz_type: quiz.quiz_type,
        quiz_status,
        is_creator: client.is_creator,
    }));

    state.hub().broadcast_to_instance(
        client.instance_id,
        ServerMessage::ParticipantsUpdate(ParticipantsUpdatePayload {
            action: ParticipantAction::Joined,
            user_id: client.user_id,
            count: state.hub().instance_count(client.instance_id),
        }),
    );

    if quiz_status == InstanceStatus::Active {
        if !client.is_creator
            && let Err(err) = store
                .update_status(
                    client.instance_id,
                    client.user_id,
                    SessionStatus::InProgress,
                )
                .await
        {
            warn!(user_id = %client.user_id, error = %err, "failed to update late joiner session status");
        }

        let resume_state = state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(RESUME_DELAY).await;
            handle_resume(resume_state, client, quiz).await;
        });
    }
}

/// Place a reconnecting client back on the exact question the instance is
/// on, with the exact remaining time, never re-serving an answered question.
pub async fn handle_resume(state: SharedState, client: ClientHandle, quiz: QuizData) {
    let store = match state.require_session_store().await {
        Ok(store) => store,
        Err(err) => {
            warn!(error = %err, "session store unavailable for resume");
            return;
        }
    };

    let session = match store.find(client.instance_id, client.user_id).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            warn!(user_id = %client.user_id, "no session to resume");
            return;
        }
        Err(err) => {
            warn!(user_id = %client.user_id, error = %err, "failed to load session for resume");
            return;
        }
    };

    if quiz.quiz_type == QuizType::Async {
        // Async participants have independent progress; their own index is
        // the resume point.
        progression_service::send_question(&state, &client, &quiz, session.current_question_index)
            .await;
        return;
    }

    let current_index = progression_service::current_sync_index(&state, client.instance_id).await;
    let Some(question) = quiz.questions.get(current_index) else {
        return;
    };

    let start_key =
        progression_service::question_start_key_for(quiz.quiz_type, &client, current_index);
    let started_at = progression_service::read_question_start(&state, &start_key).await;

    let expired = match started_at {
        Some(start) if question.time_limit_sec > 0 => {
            now_millis() - start > i64::from(question.time_limit_sec) * 1000
        }
        _ => false,
    };

    let all_answered = match store.list_by_instance(client.instance_id).await {
        Ok(sessions) => {
            super::scoring::question_progress(&sessions, quiz.creator_id, current_index)
                .all_answered()
        }
        Err(err) => {
            warn!(instance_id = %client.instance_id, error = %err, "failed to evaluate progress for resume");
            false
        }
    };

    if client.is_creator {
        if expired || all_answered {
            send_leaderboard(&state, &client, quiz.creator_id).await;
            client.send(ServerMessage::WaitingForCreator(WaitingForCreatorPayload {
                question_index: current_index,
                reason: Some("Waiting for continue command".to_owned()),
            }));
        } else {
            progression_service::notify_creator_progress(
                &state,
                client.instance_id,
                quiz.creator_id,
                current_index,
            )
            .await;
        }
        return;
    }

    if session.current_question_index > current_index {
        // Already answered the running question; park until the creator moves on.
        send_leaderboard(&state, &client, quiz.creator_id).await;
        client.send(ServerMessage::WaitingForCreator(WaitingForCreatorPayload {
            question_index: current_index,
            reason: Some("Waiting for next question".to_owned()),
        }));
    } else if expired {
        send_leaderboard(&state, &client, quiz.creator_id).await;
        client.send(ServerMessage::TimeExpired(TimeExpiredPayload {
            question_index: current_index,
        }));
        client.send(ServerMessage::WaitingForCreator(WaitingForCreatorPayload {
            question_index: current_index,
            reason: Some("Time expired".to_owned()),
        }));
    } else {
        // Re-serve the running question with its remaining time; this also
        // restarts the local timer.
        progression_service::send_question(&state, &client, &quiz, current_index).await;
    }
}

async fn send_leaderboard(state: &SharedState, client: &ClientHandle, creator_id: Uuid) {
    let leaderboard =
        progression_service::load_leaderboard(state, client.instance_id, creator_id).await;
    client.send(ServerMessage::Leaderboard(LeaderboardPayload { leaderboard }));
}

fn schedule_unregister(state: &SharedState, client: &ClientHandle) {
    let state = state.clone();
    let instance_id = client.instance_id;
    let conn_id = client.conn_id;
    tokio::spawn(async move {
        tokio::time::sleep(REJECT_UNREGISTER_DELAY).await;
        state.hub().dispatch(HubCommand::Unregister {
            instance_id,
            conn_id,
        });
    });
}
