use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::runtime::Handle;
use tracing::warn;
use webrtc::data_channel::RTCDataChannel;

use rtc_ice::{should_signal, Candidate};
use rtc_proto::{
    CoreError, CoreResult, IceServerConfig, ParticipantId, PeerManagerConfig, Role, SdpKind,
    SessionId, SignalingSink,
};
use rtc_turn::generate_credentials;

use crate::data_channel::{DataChannelTransport, Transport};
use crate::engine;
use crate::peer_connection::PeerConnection;

type TransportReadyCallback = Box<dyn Fn(Arc<dyn Transport>, ParticipantId) + Send + Sync>;
type GatheringTimeoutCallback = Box<dyn Fn(ParticipantId, u64, u64) + Send + Sync>;

/// One-to-one with a Peer Connection. `current_id` is mutable because a
/// Joiner's provisional entry gets re-keyed once the real answer arrives.
struct PeerEntry {
    session_id: SessionId,
    current_id: Mutex<ParticipantId>,
    peer_connection: PeerConnection,
    transport: Mutex<Option<Arc<dyn Transport>>>,
    connected: AtomicBool,
}

struct ManagerInner {
    role: Role,
    ice_servers: Vec<IceServerConfig>,
    turn_secret: Option<String>,
    turn_credential_ttl_secs: u64,
    skip_host: bool,
    signaling: Arc<dyn SignalingSink>,
    table: Mutex<HashMap<ParticipantId, Arc<PeerEntry>>>,
    transport_ready_cb: Mutex<Option<TransportReadyCallback>>,
    gathering_timeout_cb: Mutex<Option<GatheringTimeoutCallback>>,
    runtime: Handle,
}

/// Owns the set of peer connections for this endpoint and mediates between
/// the signaling channel (ACDS) and the WebRTC Adapter. The peer table is
/// protected by a single mutex; lookups/inserts/deletes happen under it, and
/// the lock is always released before an engine call, a signaling send, or
/// an application-facing callback.
pub struct PeerManager {
    inner: Arc<ManagerInner>,
}

impl PeerManager {
    /// Allocates the manager and bumps the engine's process-wide refcount.
    /// Must run on a Tokio runtime — the manager schedules signaling sends
    /// and DataChannel engine calls as tasks on it.
    pub async fn create(config: PeerManagerConfig, signaling: Arc<dyn SignalingSink>) -> CoreResult<PeerManager> {
        engine::init()?;
        let runtime = Handle::try_current()
            .map_err(|_| CoreError::Init("PeerManager::create must run inside a Tokio runtime".into()))?;

        Ok(PeerManager {
            inner: Arc::new(ManagerInner {
                role: config.role,
                ice_servers: config.ice_servers,
                turn_secret: config.turn_secret,
                turn_credential_ttl_secs: config.turn_credential_ttl_secs,
                skip_host: config.skip_host,
                signaling,
                table: Mutex::new(HashMap::new()),
                transport_ready_cb: Mutex::new(None),
                gathering_timeout_cb: Mutex::new(None),
                runtime,
            }),
        })
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    /// Fired once per Peer Connection when its DataChannel reaches `open`.
    /// Ownership of the transport passes to this callback; if none is
    /// registered the transport is closed immediately.
    pub fn on_transport_ready(&self, cb: impl Fn(Arc<dyn Transport>, ParticipantId) + Send + Sync + 'static) {
        *self.inner.transport_ready_cb.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(cb));
    }

    pub fn on_gathering_timeout(&self, cb: impl Fn(ParticipantId, u64, u64) + Send + Sync + 'static) {
        *self.inner.gathering_timeout_cb.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(cb));
    }

    /// Tears down every peer entry and releases the engine refcount this
    /// manager was holding.
    pub async fn destroy(&self) {
        let entries: Vec<Arc<PeerEntry>> = {
            let mut table = self.inner.table.lock().unwrap_or_else(|e| e.into_inner());
            table.drain().map(|(_, v)| v).collect()
        };

        for entry in entries {
            if let Some(t) = entry.transport.lock().unwrap_or_else(|e| e.into_inner()).take() {
                t.close();
            }
            let _ = entry.peer_connection.close().await;
        }

        engine::release();
    }

    /// Joiner-only: creates the peer entry and the local DataChannel, which
    /// causes the engine to auto-emit the offer via the local-description
    /// path wired in `wire_signaling`.
    pub async fn connect(&self, session_id: SessionId, participant_id: ParticipantId) -> CoreResult<()> {
        if self.inner.role != Role::Joiner {
            return Err(CoreError::InvalidParam("connect() is only valid for the Joiner role".into()));
        }

        let entry = self.new_entry(session_id, participant_id).await?;
        let dc = entry
            .peer_connection
            .create_data_channel("acip")
            .await?;
        attach_transport(&self.inner, &entry, dc);
        Ok(())
    }

    /// Routes an inbound SDP packet. A fresh offer (Creator role) creates
    /// the peer entry; an answer (Joiner role) resolves the existing entry,
    /// re-keying a provisional all-zero entry if this is the first answer
    /// seen for it.
    pub async fn handle_sdp(
        &self,
        session_id: SessionId,
        sender_id: ParticipantId,
        kind: SdpKind,
        sdp: String,
    ) -> CoreResult<()> {
        let entry = match kind {
            SdpKind::Offer => self.new_entry(session_id, sender_id).await?,
            SdpKind::Answer => self.locate_for_answer(sender_id)?,
        };

        entry.peer_connection.set_remote_description(&sdp, kind).await
    }

    /// An ICE packet for an unknown peer is logged and dropped, not an
    /// error — the offer/answer carrying that peer's entry may simply not
    /// have arrived yet.
    pub async fn handle_ice(
        &self,
        _session_id: SessionId,
        sender_id: ParticipantId,
        candidate: String,
        mid: String,
    ) -> CoreResult<()> {
        let entry = {
            let table = self.inner.table.lock().unwrap_or_else(|e| e.into_inner());
            table.get(&sender_id).cloned()
        };

        let Some(entry) = entry else {
            warn!(%sender_id, "ICE candidate for unknown peer; dropping");
            return Ok(());
        };

        entry.peer_connection.add_remote_candidate(&candidate, Some(&mid)).await
    }

    /// Tears down peers whose ICE gathering has run longer than
    /// `timeout_ms` without connecting, firing `on_gathering_timeout` for
    /// each. Returns the number torn down.
    pub async fn check_gathering_timeouts(&self, timeout_ms: u64) -> usize {
        let victims: Vec<(ParticipantId, Arc<PeerEntry>)> = {
            let mut table = self.inner.table.lock().unwrap_or_else(|e| e.into_inner());
            let mut victims = Vec::new();
            table.retain(|id, entry| {
                let exceeded = !entry.connected.load(Ordering::SeqCst)
                    && entry.peer_connection.gathering_elapsed_ms() > timeout_ms;
                if exceeded {
                    victims.push((*id, Arc::clone(entry)));
                }
                !exceeded
            });
            victims
        };

        let count = victims.len();
        for (id, entry) in victims {
            let elapsed = entry.peer_connection.gathering_elapsed_ms();
            if let Some(t) = entry.transport.lock().unwrap_or_else(|e| e.into_inner()).take() {
                t.close();
            }
            let _ = entry.peer_connection.close().await;

            if let Some(cb) = self.inner.gathering_timeout_cb.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                cb(id, timeout_ms, elapsed);
            }
        }
        count
    }

    async fn new_entry(&self, session_id: SessionId, participant_id: ParticipantId) -> CoreResult<Arc<PeerEntry>> {
        let ice_servers = self.resolve_ice_servers(session_id)?;
        let peer_connection = PeerConnection::create(&ice_servers).await?;

        let entry = Arc::new(PeerEntry {
            session_id,
            current_id: Mutex::new(participant_id),
            peer_connection,
            transport: Mutex::new(None),
            connected: AtomicBool::new(false),
        });

        wire_signaling(&self.inner, &entry);
        if self.inner.role == Role::Creator {
            wire_incoming_data_channel(&self.inner, &entry);
        }

        self.inner.table.lock().unwrap_or_else(|e| e.into_inner()).insert(participant_id, Arc::clone(&entry));
        Ok(entry)
    }

    /// Clones the configured ICE server list, deriving a fresh RFC 5766
    /// long-term credential pair (via `rtc_turn`) for every entry built with
    /// `IceServerConfig::turn_ephemeral`. The credential's identity is this
    /// session's id, so a leaked credential only ever authenticates traffic
    /// for its own session.
    fn resolve_ice_servers(&self, session_id: SessionId) -> CoreResult<Vec<IceServerConfig>> {
        self.inner
            .ice_servers
            .iter()
            .cloned()
            .map(|mut server| {
                if !server.ephemeral_turn {
                    return Ok(server);
                }
                let secret = self.inner.turn_secret.as_deref().ok_or_else(|| {
                    CoreError::InvalidParam(
                        "ice_servers contains an ephemeral TURN entry but no turn_secret is configured".into(),
                    )
                })?;
                let creds = generate_credentials(
                    &session_id.to_string(),
                    secret,
                    self.inner.turn_credential_ttl_secs,
                    SystemTime::now(),
                )?;
                server.username = Some(creds.username);
                server.credential = Some(creds.password);
                Ok(server)
            })
            .collect()
    }

    /// Looks up the entry already keyed by `sender_id`, or re-keys the
    /// provisional all-zero entry if this is the first answer it's seeing.
    fn locate_for_answer(&self, sender_id: ParticipantId) -> CoreResult<Arc<PeerEntry>> {
        let mut table = self.inner.table.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(entry) = table.get(&sender_id) {
            return Ok(Arc::clone(entry));
        }

        if let Some(entry) = table.remove(&ParticipantId::PROVISIONAL) {
            *entry.current_id.lock().unwrap_or_else(|e| e.into_inner()) = sender_id;
            table.insert(sender_id, Arc::clone(&entry));
            return Ok(entry);
        }

        Err(CoreError::InvalidParam(format!(
            "no peer entry awaiting an answer for {sender_id}"
        )))
    }
}

fn wire_signaling(inner: &Arc<ManagerInner>, entry: &Arc<PeerEntry>) {
    let inner_ice = Arc::clone(inner);
    let entry_ice = Arc::clone(entry);
    entry.peer_connection.on_ice_candidate(move |candidate, sdp_mid, _sdp_mline_index| {
        let inner = Arc::clone(&inner_ice);
        let entry = Arc::clone(&entry_ice);
        let mid = sdp_mid.unwrap_or_default();
        inner.runtime.spawn(async move {
            let parsed = match Candidate::parse(&candidate) {
                Ok(c) => c,
                Err(e) => {
                    warn!("dropping unparsable outbound ICE candidate: {e}");
                    return;
                }
            };
            if !should_signal(&parsed, inner.skip_host) {
                return;
            }
            let peer_id = *entry.current_id.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = inner.signaling.send_ice(entry.session_id, peer_id, candidate, mid).await {
                warn!("send_ice failed: {e}");
            }
        });
    });

    let inner_sdp = Arc::clone(inner);
    let entry_sdp = Arc::clone(entry);
    entry.peer_connection.on_local_description(move |kind, sdp| {
        let inner = Arc::clone(&inner_sdp);
        let entry = Arc::clone(&entry_sdp);
        inner.runtime.spawn(async move {
            let peer_id = *entry.current_id.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = inner.signaling.send_sdp(entry.session_id, peer_id, kind, sdp).await {
                warn!("send_sdp failed: {e}");
            }
        });
    });
}

/// Creator-only: the DataChannel for this peer is *received* via the
/// engine's event rather than created locally.
fn wire_incoming_data_channel(inner: &Arc<ManagerInner>, entry: &Arc<PeerEntry>) {
    let inner = Arc::clone(inner);
    let entry = Arc::clone(entry);
    entry.peer_connection.on_data_channel(move |dc| {
        attach_transport(&inner, &entry, dc);
    });
}

/// Wraps `dc` in a `DataChannelTransport`, wires its close to cascade into
/// the owning Peer Connection, and fires `transport_ready` — synthesizing
/// the open event if `dc` was already open when handed to us.
fn attach_transport(inner: &Arc<ManagerInner>, entry: &Arc<PeerEntry>, dc: Arc<RTCDataChannel>) -> Arc<DataChannelTransport> {
    let transport = DataChannelTransport::new(dc, inner.runtime.clone());
    *entry.transport.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&transport) as Arc<dyn Transport>);

    let inner_cascade = Arc::clone(inner);
    let entry_cascade = Arc::clone(entry);
    transport.set_close_cascade(move || {
        let runtime = inner_cascade.runtime.clone();
        runtime.spawn(async move {
            let _ = entry_cascade.peer_connection.close().await;
        });
    });

    let inner_ready = Arc::clone(inner);
    let entry_ready = Arc::clone(entry);
    let transport_ready = Arc::clone(&transport);
    transport.on_ready_once(move || {
        entry_ready.connected.store(true, Ordering::SeqCst);
        let peer_id = *entry_ready.current_id.lock().unwrap_or_else(|e| e.into_inner());
        // Ownership of the transport passes to the application the moment this
        // fires (spec §4.4): drop the entry's own reference so destroy()/
        // check_gathering_timeouts() can never reach back in and force-close a
        // transport the caller already owns.
        entry_ready.transport.lock().unwrap_or_else(|e| e.into_inner()).take();
        let cb = inner_ready.transport_ready_cb.lock().unwrap_or_else(|e| e.into_inner());
        match cb.as_ref() {
            Some(f) => f(transport_ready as Arc<dyn Transport>, peer_id),
            None => transport_ready.close(),
        }
    });

    transport
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    struct NullSignaling;

    #[async_trait]
    impl SignalingSink for NullSignaling {
        async fn send_sdp(&self, _: SessionId, _: ParticipantId, _: SdpKind, _: String) -> CoreResult<()> {
            Ok(())
        }

        async fn send_ice(&self, _: SessionId, _: ParticipantId, _: String, _: String) -> CoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn ice_for_unknown_peer_is_benign() {
        let _guard = engine::test_support::guard();
        let manager = PeerManager::create(PeerManagerConfig::new(Role::Creator), Arc::new(NullSignaling))
            .await
            .unwrap();

        let unknown = ParticipantId(Uuid::new_v4());
        let result = manager
            .handle_ice(SessionId(Uuid::new_v4()), unknown, "irrelevant".into(), "0".into())
            .await;

        assert!(result.is_ok());
        assert!(manager.inner.table.lock().unwrap_or_else(|e| e.into_inner()).is_empty());

        manager.destroy().await;
    }

    #[tokio::test]
    async fn joiner_provisional_entry_rekeys_on_first_answer() {
        let _guard = engine::test_support::guard();
        let manager = PeerManager::create(PeerManagerConfig::new(Role::Joiner), Arc::new(NullSignaling))
            .await
            .unwrap();

        let session = SessionId(Uuid::new_v4());
        manager.connect(session, ParticipantId::PROVISIONAL).await.unwrap();
        assert!(manager.inner.table.lock().unwrap_or_else(|e| e.into_inner()).contains_key(&ParticipantId::PROVISIONAL));

        let real_id = ParticipantId(Uuid::new_v4());
        let entry = manager.locate_for_answer(real_id).unwrap();
        assert_eq!(*entry.current_id.lock().unwrap_or_else(|e| e.into_inner()), real_id);

        let table = manager.inner.table.lock().unwrap_or_else(|e| e.into_inner());
        assert!(table.contains_key(&real_id));
        assert!(!table.contains_key(&ParticipantId::PROVISIONAL));
        assert_eq!(table.len(), 1);
        drop(table);

        manager.destroy().await;
    }

    #[tokio::test]
    async fn connect_rejects_creator_role() {
        let _guard = engine::test_support::guard();
        let manager = PeerManager::create(PeerManagerConfig::new(Role::Creator), Arc::new(NullSignaling))
            .await
            .unwrap();

        let err = manager
            .connect(SessionId(Uuid::new_v4()), ParticipantId::PROVISIONAL)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidParam(_)));

        manager.destroy().await;
    }

    #[tokio::test]
    async fn resolve_ice_servers_derives_ephemeral_turn_credentials() {
        let _guard = engine::test_support::guard();
        let mut config = PeerManagerConfig::new(Role::Joiner);
        config.turn_secret = Some("my-turn-secret".into());
        config.ice_servers.push(IceServerConfig::turn_ephemeral("turn:turn.example.com:3478"));

        let manager = PeerManager::create(config, Arc::new(NullSignaling)).await.unwrap();
        let session = SessionId(Uuid::new_v4());

        let resolved = manager.resolve_ice_servers(session).unwrap();
        let turn_entry = resolved.iter().find(|s| s.ephemeral_turn).unwrap();
        assert!(turn_entry.username.as_ref().unwrap().ends_with(&session.to_string()));
        assert!(turn_entry.credential.is_some());

        manager.destroy().await;
    }

    #[tokio::test]
    async fn resolve_ice_servers_rejects_ephemeral_turn_without_secret() {
        let _guard = engine::test_support::guard();
        let mut config = PeerManagerConfig::new(Role::Joiner);
        config.ice_servers.push(IceServerConfig::turn_ephemeral("turn:turn.example.com:3478"));

        let manager = PeerManager::create(config, Arc::new(NullSignaling)).await.unwrap();
        let err = manager.resolve_ice_servers(SessionId(Uuid::new_v4())).unwrap_err();
        assert!(matches!(err, CoreError::InvalidParam(_)));

        manager.destroy().await;
    }
}
