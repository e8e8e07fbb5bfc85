//! The hub dispatcher: a single loop consuming registration, message and
//! timer events, serializing per-instance control flow.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{ClientCommand, ParticipantAction, ParticipantsUpdatePayload, ServerMessage},
    services::{join_service, progression_service},
    state::{
        SharedState,
        hub::{ClientHandle, HubCommand},
    },
};

/// Run the dispatcher until the command channel closes. Spawned once at
/// startup; `start_quiz`, `answer` and `continue` are handled inline so a
/// racing answer and continue can never advance a question twice.
pub async fn run(state: SharedState) {
    let Some(mut commands) = state.take_hub_receiver() else {
        error!("hub dispatcher started twice; refusing to run");
        return;
    };

    info!("hub dispatcher started");

    while let Some(command) = commands.recv().await {
        match command {
            HubCommand::Register(client) => register_client(&state, client),
            HubCommand::Unregister {
                instance_id,
                conn_id,
            } => unregister_client(&state, instance_id, conn_id),
            HubCommand::Inbound { client, command } => {
                let handled =
                    AssertUnwindSafe(handle_client_command(&state, &client, command))
                        .catch_unwind()
                        .await;
                if handled.is_err() {
                    // A handler panic must not take the hub down; the
                    // offending client is force-disconnected.
                    error!(
                        user_id = %client.user_id,
                        instance_id = %client.instance_id,
                        "panic in message handler; disconnecting client"
                    );
                    client.close();
                    unregister_client(&state, client.instance_id, client.conn_id);
                }
            }
            HubCommand::QuestionTimeout { key } => {
                progression_service::handle_question_timeout(&state, key).await;
            }
            HubCommand::SendQuestion {
                client,
                question_index,
            } => send_scheduled_question(&state, client, question_index).await,
        }
    }

    info!("hub dispatcher stopped");
}

fn register_client(state: &SharedState, client: ClientHandle) {
    state.hub().insert_client(client.clone());
    info!(
        user_id = %client.user_id,
        instance_id = %client.instance_id,
        is_creator = client.is_creator,
        "client registered"
    );

    tokio::spawn(join_service::handle_join(state.clone(), client));
}

fn unregister_client(state: &SharedState, instance_id: Uuid, conn_id: Uuid) {
    let Some((client, remaining)) = state.hub().remove_client(instance_id, conn_id) else {
        return;
    };
    client.close();

    if remaining == 0 {
        // Nobody is left to observe this instance; its timers die with it.
        state.hub().cancel_instance_timers(instance_id);
    } else {
        state.hub().broadcast_to_instance(
            instance_id,
            ServerMessage::ParticipantsUpdate(ParticipantsUpdatePayload {
                action: ParticipantAction::Left,
                user_id: client.user_id,
                count: remaining,
            }),
        );
    }

    info!(user_id = %client.user_id, instance_id = %instance_id, "client unregistered");
}

async fn handle_client_command(state: &SharedState, client: &ClientHandle, command: ClientCommand) {
    match command {
        // Join is part of the connection handshake; explicit joins are
        // tolerated and ignored.
        ClientCommand::Join => {}
        ClientCommand::StartQuiz => {
            if client.is_creator {
                progression_service::handle_start_quiz(state, client).await;
            } else {
                client.send_error("Only the creator can start the quiz");
            }
        }
        ClientCommand::Answer(payload) => {
            progression_service::handle_answer(state, client, payload).await;
        }
        ClientCommand::Continue => {
            if client.is_creator {
                progression_service::handle_continue(state, client).await;
            } else {
                client.send_error("Only the creator can continue");
            }
        }
        ClientCommand::Ping => client.send(ServerMessage::Pong),
        ClientCommand::Unknown(kind) => {
            client.send_error(format!("Unknown message type: {kind}"));
        }
    }
}

/// Deferred question delivery (async pacing). The quiz payload is re-read
/// from the cache so a stale clone never drives progression.
async fn send_scheduled_question(state: &SharedState, client: ClientHandle, question_index: usize) {
    match progression_service::load_quiz_data(state, client.instance_id).await {
        Ok(quiz) => progression_service::send_question(state, &client, &quiz, question_index).await,
        Err(err) => {
            warn!(
                instance_id = %client.instance_id,
                error = %err,
                "failed to load quiz data for scheduled question"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::{
        dto::{
            quiz::{InstanceStatus, QuizType},
            ws::ServerMessage,
        },
        services::test_support::{assert_no_message_matching, harness, question, wait_for},
    };

    #[tokio::test]
    async fn ping_is_answered_with_pong() {
        let harness = harness(QuizType::Sync, vec![question("q1", 0, "\"a\"", 10, 0)]).await;
        let (client, mut rx) = harness.connect(Uuid::new_v4(), false);

        wait_for(&mut rx, |m| matches!(m, ServerMessage::Connected(_))).await;
        harness.send(&client, ClientCommand::Ping);

        let reply = wait_for(&mut rx, |m| matches!(m, ServerMessage::Pong)).await;
        assert!(matches!(reply, ServerMessage::Pong));
    }

    #[tokio::test]
    async fn unknown_message_types_are_echoed_back() {
        let harness = harness(QuizType::Sync, vec![question("q1", 0, "\"a\"", 10, 0)]).await;
        let (client, mut rx) = harness.connect(Uuid::new_v4(), false);

        harness.send(&client, ClientCommand::Unknown("shout".to_owned()));

        let error = wait_for(&mut rx, |m| matches!(m, ServerMessage::Error(_))).await;
        match error {
            ServerMessage::Error(payload) => {
                assert_eq!(payload.message, "Unknown message type: shout");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn creator_gated_commands_reject_participants() {
        let harness = harness(QuizType::Sync, vec![question("q1", 0, "\"a\"", 10, 0)]).await;
        let (participant, mut rx) = harness.connect(Uuid::new_v4(), false);

        wait_for(&mut rx, |m| matches!(m, ServerMessage::Connected(_))).await;

        harness.send(&participant, ClientCommand::StartQuiz);
        let error = wait_for(&mut rx, |m| matches!(m, ServerMessage::Error(_))).await;
        match error {
            ServerMessage::Error(payload) => {
                assert_eq!(payload.message, "Only the creator can start the quiz");
            }
            other => panic!("expected error, got {other:?}"),
        }

        harness.send(&participant, ClientCommand::Continue);
        let error = wait_for(&mut rx, |m| matches!(m, ServerMessage::Error(_))).await;
        match error {
            ServerMessage::Error(payload) => {
                assert_eq!(payload.message, "Only the creator can continue");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn join_handshake_announces_membership() {
        let harness = harness(QuizType::Sync, vec![question("q1", 0, "\"a\"", 10, 0)]).await;
        let first_user = Uuid::new_v4();
        let second_user = Uuid::new_v4();

        let (_first, mut first_rx) = harness.connect(first_user, false);
        let connected = wait_for(&mut first_rx, |m| matches!(m, ServerMessage::Connected(_))).await;
        match connected {
            ServerMessage::Connected(payload) => {
                assert_eq!(
                    payload.session_id,
                    format!("{}:{}", harness.catalog.instance_id(), first_user)
                );
                assert_eq!(payload.quiz_status, InstanceStatus::Waiting);
                assert!(!payload.is_creator);
            }
            other => panic!("expected connected, got {other:?}"),
        }

        let (second, mut second_rx) = harness.connect(second_user, false);
        wait_for(&mut second_rx, |m| matches!(m, ServerMessage::Connected(_))).await;

        // The first client observes the newcomer.
        let update = wait_for(&mut first_rx, |m| {
            matches!(m, ServerMessage::ParticipantsUpdate(p) if p.user_id == second_user)
        })
        .await;
        match update {
            ServerMessage::ParticipantsUpdate(payload) => {
                assert_eq!(payload.action, ParticipantAction::Joined);
                assert_eq!(payload.count, 2);
            }
            other => panic!("expected participants update, got {other:?}"),
        }

        // And its departure, with the decremented count.
        harness.disconnect(&second);
        let update = wait_for(&mut first_rx, |m| {
            matches!(m, ServerMessage::ParticipantsUpdate(p) if p.action == ParticipantAction::Left)
        })
        .await;
        match update {
            ServerMessage::ParticipantsUpdate(payload) => {
                assert_eq!(payload.user_id, second_user);
                assert_eq!(payload.count, 1);
            }
            other => panic!("expected participants update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn joining_a_finished_quiz_is_rejected() {
        let harness = harness(QuizType::Sync, vec![question("q1", 0, "\"a\"", 10, 0)]).await;
        harness.catalog.set_status(InstanceStatus::Finished);

        let (_client, mut rx) = harness.connect(Uuid::new_v4(), false);
        let error = wait_for(&mut rx, |m| matches!(m, ServerMessage::Error(_))).await;
        match error {
            ServerMessage::Error(payload) => {
                assert_eq!(payload.message, "Quiz has already finished");
            }
            other => panic!("expected error, got {other:?}"),
        }

        // No handshake follows the rejection, and the delayed unregister
        // empties the instance.
        assert_no_message_matching(&mut rx, Duration::from_millis(700), |m| {
            matches!(m, ServerMessage::Connected(_))
        })
        .await;
        assert_eq!(
            harness
                .state
                .hub()
                .instance_count(harness.catalog.instance_id()),
            0
        );
    }

    #[tokio::test]
    async fn last_client_leaving_cancels_instance_timers() {
        let harness = harness(QuizType::Sync, vec![question("q1", 0, "\"a\"", 10, 30)]).await;
        let creator = harness.catalog.creator_id();

        let (creator_client, mut creator_rx) = harness.connect(creator, true);
        let (participant, mut participant_rx) = harness.connect(Uuid::new_v4(), false);
        wait_for(&mut creator_rx, |m| matches!(m, ServerMessage::Connected(_))).await;
        wait_for(&mut participant_rx, |m| {
            matches!(m, ServerMessage::Connected(_))
        })
        .await;

        harness.send(&creator_client, ClientCommand::StartQuiz);
        wait_for(&mut participant_rx, |m| {
            matches!(m, ServerMessage::Question(_))
        })
        .await;
        assert_eq!(
            harness
                .state
                .hub()
                .pending_timer_count(harness.catalog.instance_id()),
            1
        );

        harness.disconnect(&participant);
        harness.disconnect(&creator_client);

        // Give the dispatcher a beat to process both unregisters.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(
            harness
                .state
                .hub()
                .pending_timer_count(harness.catalog.instance_id()),
            0
        );
    }
}
