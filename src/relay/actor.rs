use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::types::{
    ParticipantId, RelayError, Room, RoomCode, RoomParticipant, RoomSnapshot, RoomStatus,
};
use crate::signaling::SignalingMessage;

/// Participants allowed per room, host included
pub const MAX_ROOM_PARTICIPANTS: usize = 16;

type Reply<T> = oneshot::Sender<Result<T, RelayError>>;

/// Commands sent to the relay actor
pub(crate) enum RelayCommand {
    CreateRoom {
        host_id: ParticipantId,
        host_name: String,
        quiz_data: serde_json::Value,
        seconds_per_question: u32,
        reply: Reply<RoomSnapshot>,
    },
    GetRoom {
        code: RoomCode,
        reply: Reply<RoomSnapshot>,
    },
    Join {
        code: RoomCode,
        participant: RoomParticipant,
        reply: Reply<RoomSnapshot>,
    },
    Leave {
        code: RoomCode,
        participant_id: ParticipantId,
        reply: Reply<()>,
    },
    Start {
        code: RoomCode,
        host_id: ParticipantId,
        reply: Reply<()>,
    },
    Delete {
        code: RoomCode,
        host_id: ParticipantId,
        reply: Reply<()>,
    },
    PostSignal {
        code: RoomCode,
        message: SignalingMessage,
        reply: Reply<()>,
    },
    TakeSignals {
        code: RoomCode,
        participant_id: ParticipantId,
        reply: Reply<Vec<SignalingMessage>>,
    },
    Peers {
        code: RoomCode,
        participant_id: ParticipantId,
        reply: Reply<Vec<ParticipantId>>,
    },
}

pub(crate) async fn relay_actor(mut rx: mpsc::Receiver<RelayCommand>) {
    let mut rooms: HashMap<RoomCode, Room> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RelayCommand::CreateRoom {
                host_id,
                host_name,
                quiz_data,
                seconds_per_question,
                reply,
            } => {
                let mut code = RoomCode::generate();
                while rooms.contains_key(&code) {
                    code = RoomCode::generate();
                }

                let room = Room {
                    host_id,
                    status: RoomStatus::Waiting,
                    seconds_per_question,
                    quiz_data,
                    participants: vec![RoomParticipant {
                        id: host_id,
                        name: host_name,
                        is_host: true,
                    }],
                    mailboxes: HashMap::new(),
                    next_sequence: 1,
                };
                let snapshot = room.snapshot(code);
                rooms.insert(code, room);

                info!("Room created: {} by host {}", code, host_id);
                let _ = reply.send(Ok(snapshot));
            }

            RelayCommand::GetRoom { code, reply } => {
                let result = rooms
                    .get(&code)
                    .map(|room| room.snapshot(code))
                    .ok_or(RelayError::RoomNotFound(code));
                let _ = reply.send(result);
            }

            RelayCommand::Join {
                code,
                participant,
                reply,
            } => {
                let result = match rooms.get_mut(&code) {
                    None => Err(RelayError::RoomNotFound(code)),
                    Some(room) if room.status == RoomStatus::Ended => {
                        Err(RelayError::RoomNotFound(code))
                    }
                    Some(room) => {
                        if let Some(existing) =
                            room.participants.iter_mut().find(|p| p.id == participant.id)
                        {
                            existing.name = participant.name;
                            Ok(room.snapshot(code))
                        } else if room.participants.len() >= MAX_ROOM_PARTICIPANTS {
                            Err(RelayError::RoomFull(code))
                        } else {
                            info!("Participant {} joined room {}", participant.id, code);
                            room.participants.push(RoomParticipant {
                                is_host: false,
                                ..participant
                            });
                            Ok(room.snapshot(code))
                        }
                    }
                };
                let _ = reply.send(result);
            }

            RelayCommand::Leave {
                code,
                participant_id,
                reply,
            } => {
                let result = match rooms.get_mut(&code) {
                    None => Err(RelayError::RoomNotFound(code)),
                    Some(room) => {
                        room.participants.retain(|p| p.id != participant_id);
                        room.mailboxes.remove(&participant_id);
                        info!("Participant {} left room {}", participant_id, code);

                        if room.participants.is_empty() {
                            rooms.remove(&code);
                            info!("Room {} removed (empty)", code);
                        }
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }

            RelayCommand::Start {
                code,
                host_id,
                reply,
            } => {
                let result = match rooms.get_mut(&code) {
                    None => Err(RelayError::RoomNotFound(code)),
                    Some(room) if room.host_id != host_id => Err(RelayError::NotHost("start")),
                    Some(room) => {
                        room.status = RoomStatus::Playing;
                        info!("Room {} started", code);
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }

            RelayCommand::Delete {
                code,
                host_id,
                reply,
            } => {
                let result = match rooms.get(&code) {
                    None => Err(RelayError::RoomNotFound(code)),
                    Some(room) if room.host_id != host_id => Err(RelayError::NotHost("end")),
                    Some(_) => {
                        rooms.remove(&code);
                        info!("Room {} ended by host", code);
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }

            RelayCommand::PostSignal {
                code,
                mut message,
                reply,
            } => {
                let result = match rooms.get_mut(&code) {
                    None => Err(RelayError::RoomNotFound(code)),
                    Some(room) if !room.contains(&message.to_id) => Err(RelayError::NotInRoom {
                        room: code,
                        participant: message.to_id,
                    }),
                    Some(room) => {
                        message.sequence_id = room.next_sequence;
                        room.next_sequence += 1;
                        debug!(
                            "Signal {} #{} {} -> {} in {}",
                            message.kind, message.sequence_id, message.from_id, message.to_id, code
                        );
                        room.mailboxes
                            .entry(message.to_id)
                            .or_default()
                            .push(message);
                        Ok(())
                    }
                };
                let _ = reply.send(result);
            }

            RelayCommand::TakeSignals {
                code,
                participant_id,
                reply,
            } => {
                let result = match rooms.get_mut(&code) {
                    None => Err(RelayError::RoomNotFound(code)),
                    Some(room) => Ok(room
                        .mailboxes
                        .remove(&participant_id)
                        .unwrap_or_default()),
                };
                let _ = reply.send(result);
            }

            RelayCommand::Peers {
                code,
                participant_id,
                reply,
            } => {
                let result = match rooms.get(&code) {
                    None => Err(RelayError::RoomNotFound(code)),
                    Some(room) => Ok(room
                        .participants
                        .iter()
                        .map(|p| p.id)
                        .filter(|id| *id != participant_id)
                        .collect()),
                };
                let _ = reply.send(result);
            }
        }
    }
}

/// Handle to communicate with the relay actor
#[derive(Clone)]
pub struct RelayHandle {
    pub(crate) tx: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    /// Spawn a relay actor on the current runtime
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<RelayCommand>(1024);
        tokio::spawn(relay_actor(rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> RelayCommand,
    ) -> Result<T, RelayError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| RelayError::Internal("actor channel closed".to_string()))?;
        reply_rx
            .await
            .map_err(|_| RelayError::Internal("actor channel closed".to_string()))?
    }

    /// Create a new room with the host as its first participant
    pub async fn create_room(
        &self,
        host_id: ParticipantId,
        host_name: String,
        quiz_data: serde_json::Value,
        seconds_per_question: u32,
    ) -> Result<RoomSnapshot, RelayError> {
        self.request(|reply| RelayCommand::CreateRoom {
            host_id,
            host_name,
            quiz_data,
            seconds_per_question,
            reply,
        })
        .await
    }

    pub async fn get_room(&self, code: RoomCode) -> Result<RoomSnapshot, RelayError> {
        self.request(|reply| RelayCommand::GetRoom { code, reply })
            .await
    }

    /// Join an existing room. Re-joining with a known ID only updates the name.
    pub async fn join_room(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
        name: String,
    ) -> Result<RoomSnapshot, RelayError> {
        let participant = RoomParticipant {
            id: participant_id,
            name,
            is_host: false,
        };
        self.request(|reply| RelayCommand::Join {
            code,
            participant,
            reply,
        })
        .await
    }

    pub async fn leave_room(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> Result<(), RelayError> {
        self.request(|reply| RelayCommand::Leave {
            code,
            participant_id,
            reply,
        })
        .await
    }

    pub async fn start_room(&self, code: RoomCode, host_id: ParticipantId) -> Result<(), RelayError> {
        self.request(|reply| RelayCommand::Start {
            code,
            host_id,
            reply,
        })
        .await
    }

    pub async fn delete_room(&self, code: RoomCode, host_id: ParticipantId) -> Result<(), RelayError> {
        self.request(|reply| RelayCommand::Delete {
            code,
            host_id,
            reply,
        })
        .await
    }

    /// Store a signaling message in the recipient's mailbox
    pub async fn post_signal(
        &self,
        code: RoomCode,
        message: SignalingMessage,
    ) -> Result<(), RelayError> {
        self.request(|reply| RelayCommand::PostSignal {
            code,
            message,
            reply,
        })
        .await
    }

    /// Drain the participant's mailbox
    pub async fn take_signals(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> Result<Vec<SignalingMessage>, RelayError> {
        self.request(|reply| RelayCommand::TakeSignals {
            code,
            participant_id,
            reply,
        })
        .await
    }

    pub async fn peers(
        &self,
        code: RoomCode,
        participant_id: ParticipantId,
    ) -> Result<Vec<ParticipantId>, RelayError> {
        self.request(|reply| RelayCommand::Peers {
            code,
            participant_id,
            reply,
        })
        .await
    }
}
