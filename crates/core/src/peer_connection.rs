use std::sync::{Arc, Mutex};
use std::time::Instant;

use tracing::{info, warn};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::stats::StatsReportType;

use rtc_ice::{Candidate, CandidateType as IceCandidateType, Protocol as IceProtocol};
use rtc_proto::{CoreError, CoreResult, IceServerConfig, SdpKind};

use crate::engine;

/// Mirrors `RTCPeerConnectionState` one-to-one. The adapter caches the last
/// observed value so reads never have to cross into the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerConnectionState {
    fn from(s: RTCPeerConnectionState) -> Self {
        match s {
            RTCPeerConnectionState::New => PeerConnectionState::New,
            RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
            RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
            RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
            RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
            RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
            RTCPeerConnectionState::Unspecified => PeerConnectionState::New,
        }
    }
}

type IceCandidateCallback = Box<dyn Fn(String, Option<String>, Option<u16>) + Send + Sync>;
type LocalDescriptionCallback = Box<dyn Fn(SdpKind, String) + Send + Sync>;
type DataChannelCallback = Box<dyn Fn(Arc<RTCDataChannel>) + Send + Sync>;

/// The (local, remote) candidates the engine is currently using, as reported
/// by `get_stats`. `raw` is the engine's selected-pair id, useful for
/// correlating against other stats reports.
#[derive(Debug, Clone)]
pub struct SelectedPair {
    pub local: Candidate,
    pub remote: Candidate,
}

/// Typed, memory-safe façade over one `RTCPeerConnection`. Holds at most one
/// primary DataChannel and caches the last-observed connection state so
/// `state()`/`is_connected()` never need to cross into the engine.
pub struct PeerConnection {
    inner: Arc<RTCPeerConnection>,
    state: Arc<Mutex<PeerConnectionState>>,
    data_channel: Arc<Mutex<Option<Arc<RTCDataChannel>>>>,
    ice_candidate_cb: Arc<Mutex<Option<IceCandidateCallback>>>,
    local_description_cb: Arc<Mutex<Option<LocalDescriptionCallback>>>,
    data_channel_cb: Arc<Mutex<Option<DataChannelCallback>>>,
    gathering_start: Instant,
}

impl PeerConnection {
    /// Allocates the wrapper, flattens the ICE server list into the engine's
    /// configuration, and registers the state/candidate/data-channel
    /// trampolines before returning — satisfying the invariant that every
    /// engine callback is wired before any state-changing call is made.
    pub async fn create(ice_servers: &[IceServerConfig]) -> CoreResult<PeerConnection> {
        let api = engine::api()?;

        let rtc_ice_servers: Vec<RTCIceServer> = ice_servers
            .iter()
            .map(|s| RTCIceServer {
                urls: s.urls.clone(),
                username: s.username.clone().unwrap_or_default(),
                credential: s.credential.clone().unwrap_or_default(),
            })
            .collect();

        let config = RTCConfiguration {
            ice_servers: rtc_ice_servers,
            ..Default::default()
        };

        let inner = Arc::new(api.new_peer_connection(config).await.map_err(|e| {
            CoreError::Network(format!("failed to create peer connection: {e}"))
        })?);

        let state = Arc::new(Mutex::new(PeerConnectionState::New));
        let ice_candidate_cb: Arc<Mutex<Option<IceCandidateCallback>>> = Arc::new(Mutex::new(None));
        let local_description_cb: Arc<Mutex<Option<LocalDescriptionCallback>>> = Arc::new(Mutex::new(None));
        let data_channel_cb: Arc<Mutex<Option<DataChannelCallback>>> = Arc::new(Mutex::new(None));

        let state_slot = Arc::clone(&state);
        inner.on_peer_connection_state_change(Box::new(move |s| {
            let mapped = PeerConnectionState::from(s);
            *state_slot.lock().unwrap_or_else(|e| e.into_inner()) = mapped;
            info!(?mapped, "peer connection state changed");
            Box::pin(async {})
        }));

        let ice_slot = Arc::clone(&ice_candidate_cb);
        inner.on_ice_candidate(Box::new(move |candidate| {
            let ice_slot = Arc::clone(&ice_slot);
            Box::pin(async move {
                if let Some(c) = candidate {
                    match c.to_json() {
                        Ok(json) => {
                            if let Some(cb) = ice_slot.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                                cb(json.candidate, json.sdp_mid, json.sdp_mline_index);
                            }
                        }
                        Err(e) => warn!("failed to serialize ICE candidate: {e}"),
                    }
                }
            })
        }));

        let dc_slot = Arc::clone(&data_channel_cb);
        let owned_dc = Arc::new(Mutex::new(None));
        let owned_dc_for_trampoline = Arc::clone(&owned_dc);
        inner.on_data_channel(Box::new(move |dc| {
            let dc_slot = Arc::clone(&dc_slot);
            let owned_dc = Arc::clone(&owned_dc_for_trampoline);
            Box::pin(async move {
                *owned_dc.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&dc));
                if let Some(cb) = dc_slot.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                    cb(dc);
                }
            })
        }));

        Ok(PeerConnection {
            inner,
            state,
            data_channel: owned_dc,
            ice_candidate_cb,
            local_description_cb,
            data_channel_cb,
            gathering_start: Instant::now(),
        })
    }

    pub fn on_ice_candidate(&self, callback: impl Fn(String, Option<String>, Option<u16>) + Send + Sync + 'static) {
        *self.ice_candidate_cb.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(callback));
    }

    pub fn on_local_description(&self, callback: impl Fn(SdpKind, String) + Send + Sync + 'static) {
        *self.local_description_cb.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(callback));
    }

    /// Fired when the engine hands us a remotely-created DataChannel
    /// (creator side). If the channel happens to already be open by the
    /// time this registration lands, the caller is responsible for
    /// synthesizing the open event — see `crate::manager`.
    pub fn on_data_channel(&self, callback: impl Fn(Arc<RTCDataChannel>) + Send + Sync + 'static) {
        *self.data_channel_cb.lock().unwrap_or_else(|e| e.into_inner()) = Some(Box::new(callback));
    }

    /// Creates the primary DataChannel (joiner side). The engine
    /// auto-generates the offer as a side effect; callers must not also call
    /// an explicit "create offer" operation afterward — there isn't one on
    /// this type.
    pub async fn create_data_channel(&self, label: &str) -> CoreResult<Arc<RTCDataChannel>> {
        {
            let guard = self.data_channel.lock().unwrap_or_else(|e| e.into_inner());
            if guard.is_some() {
                return Err(CoreError::InvalidState(
                    "peer connection already has a primary data channel".into(),
                ));
            }
        }

        let dc = self
            .inner
            .create_data_channel(label, None)
            .await
            .map_err(|e| CoreError::Network(format!("failed to create data channel: {e}")))?;
        *self.data_channel.lock().unwrap_or_else(|e| e.into_inner()) = Some(Arc::clone(&dc));

        let offer = self
            .inner
            .create_offer(None)
            .await
            .map_err(|e| CoreError::Network(format!("failed to create offer: {e}")))?;
        self.inner
            .set_local_description(offer.clone())
            .await
            .map_err(|e| CoreError::Network(format!("failed to set local description: {e}")))?;

        if let Some(cb) = self.local_description_cb.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
            cb(SdpKind::Offer, offer.sdp);
        }

        Ok(dc)
    }

    /// Sets the remote description. For an incoming offer this also drives
    /// the answer side of the exchange (create_answer + set_local_description
    /// + the local-description callback) so from the manager's point of view
    /// the answer appears exactly as auto-generated as the joiner's offer.
    pub async fn set_remote_description(&self, sdp: &str, kind: SdpKind) -> CoreResult<()> {
        let desc = match kind {
            SdpKind::Offer => RTCSessionDescription::offer(sdp.to_string()),
            SdpKind::Answer => RTCSessionDescription::answer(sdp.to_string()),
        }
        .map_err(|e| CoreError::InvalidParam(format!("malformed SDP: {e}")))?;

        self.inner
            .set_remote_description(desc)
            .await
            .map_err(|e| CoreError::Network(format!("failed to set remote description: {e}")))?;

        if kind == SdpKind::Offer {
            let answer = self
                .inner
                .create_answer(None)
                .await
                .map_err(|e| CoreError::Network(format!("failed to create answer: {e}")))?;
            self.inner
                .set_local_description(answer.clone())
                .await
                .map_err(|e| CoreError::Network(format!("failed to set local description: {e}")))?;
            if let Some(cb) = self.local_description_cb.lock().unwrap_or_else(|e| e.into_inner()).as_ref() {
                cb(SdpKind::Answer, answer.sdp);
            }
        }

        Ok(())
    }

    pub async fn add_remote_candidate(&self, candidate_line: &str, mid: Option<&str>) -> CoreResult<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate_line.to_string(),
            sdp_mid: mid.map(|s| s.to_string()),
            ..Default::default()
        };
        self.inner
            .add_ice_candidate(init)
            .await
            .map_err(|e| CoreError::Network(format!("failed to add ICE candidate: {e}")))
    }

    pub fn state(&self) -> PeerConnectionState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_connected(&self) -> bool {
        self.state() == PeerConnectionState::Connected
    }

    pub fn gathering_elapsed_ms(&self) -> u64 {
        self.gathering_start.elapsed().as_millis() as u64
    }

    pub fn data_channel(&self) -> Option<Arc<RTCDataChannel>> {
        self.data_channel.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Retrieves the (local, remote) candidate pair the engine currently
    /// considers nominated. `InvalidState` if none has been selected yet —
    /// this API isn't available on every engine version, and the contract is
    /// to fail rather than fabricate a pair.
    pub async fn selected_pair(&self) -> CoreResult<SelectedPair> {
        let stats = self.inner.get_stats().await;

        let pair = stats.reports.values().find_map(|r| match r {
            StatsReportType::CandidatePair(p) if p.nominated => Some(p),
            _ => None,
        });
        let pair = pair.ok_or_else(|| CoreError::InvalidState("no candidate pair selected yet".into()))?;

        let local = stats
            .reports
            .get(&pair.local_candidate_id)
            .and_then(|r| match r {
                StatsReportType::LocalCandidate(c) => Some(c),
                _ => None,
            })
            .ok_or_else(|| CoreError::InvalidState("local candidate stats missing".into()))?;
        let remote = stats
            .reports
            .get(&pair.remote_candidate_id)
            .and_then(|r| match r {
                StatsReportType::RemoteCandidate(c) => Some(c),
                _ => None,
            })
            .ok_or_else(|| CoreError::InvalidState("remote candidate stats missing".into()))?;

        Ok(SelectedPair {
            local: candidate_from_stats(local),
            remote: candidate_from_stats(remote),
        })
    }

    /// Closes the owned DataChannel first, then the peer connection, and
    /// marks the cached state `Closed` so any late-arriving engine callback
    /// observes the terminal state rather than a stale one.
    pub async fn close(&self) -> CoreResult<()> {
        if let Some(dc) = self.data_channel.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = dc.close().await;
        }
        self.inner
            .close()
            .await
            .map_err(|e| CoreError::Network(format!("failed to close peer connection: {e}")))?;
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = PeerConnectionState::Closed;
        Ok(())
    }
}

fn candidate_from_stats(stats: &webrtc::stats::ICECandidateStats) -> Candidate {
    use webrtc::ice::candidate::CandidateType as EngineCandidateType;

    let typ = match stats.candidate_type {
        EngineCandidateType::Host => IceCandidateType::Host,
        EngineCandidateType::ServerReflexive => IceCandidateType::Srflx,
        EngineCandidateType::PeerReflexive => IceCandidateType::Prflx,
        EngineCandidateType::Relay => IceCandidateType::Relay,
        EngineCandidateType::Unspecified => IceCandidateType::Host,
    };

    Candidate {
        foundation: stats.id.clone(),
        component: 1,
        protocol: IceProtocol::Udp,
        priority: stats.priority,
        ip: stats.ip.clone(),
        port: stats.port,
        typ,
        related_address: None,
        related_port: None,
        tcp_type: None,
        extensions: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant as StdInstant;
    use webrtc::ice::candidate::CandidateType as EngineCandidateType;
    use webrtc::ice::network_type::NetworkType;
    use webrtc::stats::{ICECandidateStats, RTCStatsType};

    #[test]
    fn state_mapping_covers_every_engine_variant() {
        assert_eq!(PeerConnectionState::from(RTCPeerConnectionState::New), PeerConnectionState::New);
        assert_eq!(PeerConnectionState::from(RTCPeerConnectionState::Connecting), PeerConnectionState::Connecting);
        assert_eq!(PeerConnectionState::from(RTCPeerConnectionState::Connected), PeerConnectionState::Connected);
        assert_eq!(
            PeerConnectionState::from(RTCPeerConnectionState::Disconnected),
            PeerConnectionState::Disconnected
        );
        assert_eq!(PeerConnectionState::from(RTCPeerConnectionState::Failed), PeerConnectionState::Failed);
        assert_eq!(PeerConnectionState::from(RTCPeerConnectionState::Closed), PeerConnectionState::Closed);
        // Unspecified has no counterpart in our enum; it maps to the safe default.
        assert_eq!(PeerConnectionState::from(RTCPeerConnectionState::Unspecified), PeerConnectionState::New);
    }

    fn stub_stats(candidate_type: EngineCandidateType) -> ICECandidateStats {
        ICECandidateStats {
            timestamp: StdInstant::now(),
            stats_type: RTCStatsType::LocalCandidate,
            id: "cand-1".to_string(),
            candidate_type,
            deleted: false,
            ip: "203.0.113.45".to_string(),
            network_type: NetworkType::Udp4,
            port: 54321,
            priority: 1_694_498_815,
            relay_protocol: String::new(),
            url: String::new(),
        }
    }

    #[test]
    fn candidate_from_stats_maps_type_and_fields() {
        let stats = stub_stats(EngineCandidateType::ServerReflexive);
        let candidate = candidate_from_stats(&stats);

        assert_eq!(candidate.typ, IceCandidateType::Srflx);
        assert_eq!(candidate.foundation, "cand-1");
        assert_eq!(candidate.ip, "203.0.113.45");
        assert_eq!(candidate.port, 54321);
        assert_eq!(candidate.priority, 1_694_498_815);
        // component and protocol aren't present on ICECandidateStats; the
        // adapter defaults them rather than fabricating a source value.
        assert_eq!(candidate.component, 1);
        assert_eq!(candidate.protocol, IceProtocol::Udp);
    }

    #[test]
    fn candidate_from_stats_defaults_unspecified_to_host() {
        let stats = stub_stats(EngineCandidateType::Unspecified);
        assert_eq!(candidate_from_stats(&stats).typ, IceCandidateType::Host);
    }
}
