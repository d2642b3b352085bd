use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::candidate::IceCandidate;
use super::outbox::DataChannelOutbox;
use super::sdp::{opus_fmtp, pin_opus};
use super::sink::OpusTrackSink;
use crate::core::audio::{AudioChunk, OPUS_SAMPLE_RATE, OpusDecoder};
use crate::core::conversation::{AudioSink, ConversationHandle};
use crate::core::events::{
    DataChannelEvent, EventCategory, EventManager, EventPayload, SessionLifecycle, handler,
};
use crate::core::realtime::TranscriptRole;
use crate::errors::{GatewayResult, SignalingError, TransportError};

const OPUS_PAYLOAD_TYPE: u8 = 111;

/// Transport settings shared by every peer.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// STUN/TURN URLs
    pub ice_servers: Vec<String>,
    /// Opus `maxaveragebitrate` and encoder bitrate, bits per second
    pub opus_bitrate: u32,
    /// Decoded inbound frames buffered ahead of the conversation loop
    pub inbound_capacity: usize,
    /// Upper bound on ICE gathering before the answer is sent
    pub gathering_timeout: Duration,
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            opus_bitrate: 32000,
            inbound_capacity: 50,
            gathering_timeout: Duration::from_secs(5),
        }
    }
}

/// Data-channel record for one transcript sentence.
pub fn transcript_message(role: TranscriptRole, text: &str) -> String {
    serde_json::json!({ "transcript": { "role": role, "text": text } }).to_string()
}

fn opus_capability(bitrate: u32) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: MIME_TYPE_OPUS.to_owned(),
        clock_rate: OPUS_SAMPLE_RATE,
        channels: 2,
        sdp_fmtp_line: opus_fmtp(bitrate),
        rtcp_feedback: vec![],
    }
}

/// One browser connection.
pub struct Peer {
    id: String,
    config: PeerConfig,
    pc: Arc<RTCPeerConnection>,
    sink: Arc<OpusTrackSink>,
    outbox: Arc<DataChannelOutbox>,
    events: Arc<EventManager>,
    inbound: parking_lot::Mutex<Option<mpsc::Receiver<AudioChunk>>>,
    conversation: tokio::sync::Mutex<Option<Arc<ConversationHandle>>>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl Peer {
    /// Build the peer connection with an Opus-only media engine, an outbound
    /// audio track and the inbound/data-channel callbacks.
    pub async fn new(id: impl Into<String>, config: PeerConfig) -> Result<Arc<Self>, TransportError> {
        let id = id.into();

        let mut media_engine = MediaEngine::default();
        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: opus_capability(config.opus_bitrate),
                payload_type: OPUS_PAYLOAD_TYPE,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let mut rtc_config = RTCConfiguration::default();
        if !config.ice_servers.is_empty() {
            rtc_config.ice_servers = vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }];
        }
        let pc = Arc::new(api.new_peer_connection(rtc_config).await?);

        let track = Arc::new(TrackLocalStaticSample::new(
            opus_capability(config.opus_bitrate),
            "audio".to_owned(),
            format!("rehearsal-{id}"),
        ));
        let rtp_sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP has to be read for interceptors to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });

        let sink = Arc::new(OpusTrackSink::new(track, config.opus_bitrate)?);
        let outbox = Arc::new(DataChannelOutbox::new());
        let events = Arc::new(EventManager::new(id.clone()));
        let cancel = CancellationToken::new();
        let (inbound_tx, inbound_rx) = mpsc::channel(config.inbound_capacity.max(1));

        let forward = outbox.clone();
        events.subscribe(
            EventCategory::DataChannel,
            handler(move |event| {
                let outbox = forward.clone();
                async move {
                    if let EventPayload::DataChannel(DataChannelEvent::Transcript { role, text }) =
                        event.payload
                    {
                        outbox.send(transcript_message(role, &text)).await?;
                    }
                    Ok(())
                }
            }),
        );

        register_callbacks(&pc, &id, inbound_tx, &outbox, &events, &cancel);

        info!(peer_id = %id, "peer created");

        Ok(Arc::new(Self {
            id,
            config,
            pc,
            sink,
            outbox,
            events,
            inbound: parking_lot::Mutex::new(Some(inbound_rx)),
            conversation: tokio::sync::Mutex::new(None),
            cancel,
            closed: AtomicBool::new(false),
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn events(&self) -> Arc<EventManager> {
        self.events.clone()
    }

    pub fn audio_sink(&self) -> Arc<dyn AudioSink> {
        self.sink.clone()
    }

    /// The decoded inbound PCM channel. Only the first caller gets it.
    pub fn take_inbound_audio(&self) -> Option<mpsc::Receiver<AudioChunk>> {
        self.inbound.lock().take()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// Resolves once the peer is cancelled, by `close` or by the transport.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }

    /// Apply the browser's offer and return the Opus-pinned answer with the
    /// candidates gathered so far.
    pub async fn accept_offer(&self, sdp: String) -> GatewayResult<String> {
        if self.is_closed() {
            return Err(TransportError::PeerClosed.into());
        }

        let offer =
            RTCSessionDescription::offer(sdp).map_err(|e| SignalingError::InvalidSdp(e.to_string()))?;
        self.pc
            .set_remote_description(offer)
            .await
            .map_err(|e| SignalingError::InvalidSdp(e.to_string()))?;

        let answer = self.pc.create_answer(None).await?;
        let pinned = pin_opus(&answer.sdp, self.config.opus_bitrate);
        let answer = RTCSessionDescription::answer(pinned)
            .map_err(|e| SignalingError::InvalidSdp(e.to_string()))?;

        let mut gathering = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(answer).await?;

        if tokio::time::timeout(self.config.gathering_timeout, gathering.recv())
            .await
            .is_err()
        {
            warn!(peer_id = %self.id, "ICE gathering incomplete, answering with partial candidates");
        }

        let local = self
            .pc
            .local_description()
            .await
            .ok_or(TransportError::GatheringTimeout)?;
        debug!(peer_id = %self.id, "answer ready");
        Ok(local.sdp)
    }

    pub async fn add_ice_candidate(
        &self,
        candidate: &IceCandidate,
        sdp_mid: Option<String>,
        sdp_mline_index: Option<u16>,
    ) -> GatewayResult<()> {
        if self.is_closed() {
            return Err(TransportError::PeerClosed.into());
        }

        let line = candidate.to_string();
        let init = RTCIceCandidateInit {
            candidate: line.clone(),
            sdp_mid,
            sdp_mline_index,
            ..Default::default()
        };
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| SignalingError::InvalidCandidate {
                candidate: line,
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Make `handle` the peer's conversation, stopping any previous one.
    pub async fn attach_conversation(&self, handle: Arc<ConversationHandle>) -> Result<(), TransportError> {
        if self.is_closed() {
            handle.stop().await;
            return Err(TransportError::PeerClosed);
        }

        let previous = self.conversation.lock().await.replace(handle);
        if let Some(previous) = previous {
            debug!(peer_id = %self.id, "replacing conversation");
            previous.stop().await;
        }
        Ok(())
    }

    /// Queue a transcript record on the data channel.
    pub async fn send_transcript(&self, role: TranscriptRole, text: &str) -> Result<(), TransportError> {
        self.outbox.send(transcript_message(role, text)).await
    }

    /// Tear the peer down. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        // Stopped before the track callback drops the inbound sender
        let conversation = self.conversation.lock().await.take();
        if let Some(conversation) = conversation {
            conversation.stop().await;
        }

        self.pc.on_track(Box::new(|_, _, _| Box::pin(async {})));
        self.pc.on_data_channel(Box::new(|_| Box::pin(async {})));
        self.pc
            .on_peer_connection_state_change(Box::new(|_| Box::pin(async {})));

        self.events.shutdown().await;
        self.outbox.close().await;
        self.inbound.lock().take();

        if let Err(e) = self.pc.close().await {
            warn!(peer_id = %self.id, "error closing peer connection: {}", e);
        }
        info!(peer_id = %self.id, "peer closed");
    }
}

fn register_callbacks(
    pc: &Arc<RTCPeerConnection>,
    peer_id: &str,
    inbound_tx: mpsc::Sender<AudioChunk>,
    outbox: &Arc<DataChannelOutbox>,
    events: &Arc<EventManager>,
    cancel: &CancellationToken,
) {
    {
        let peer_id = peer_id.to_string();
        let cancel = cancel.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let peer_id = peer_id.clone();
            let cancel = cancel.clone();
            let tx = inbound_tx.clone();
            Box::pin(async move {
                if track.kind() != RTPCodecType::Audio || cancel.is_cancelled() {
                    return;
                }
                info!(peer_id = %peer_id, ssrc = track.ssrc(), "inbound audio track");
                tokio::spawn(read_inbound(peer_id, track, tx, cancel));
            })
        }));
    }

    {
        let peer_id = peer_id.to_string();
        let outbox = outbox.clone();
        let events = events.clone();
        let cancel = cancel.clone();
        pc.on_data_channel(Box::new(move |channel: Arc<RTCDataChannel>| {
            let peer_id = peer_id.clone();
            let outbox = outbox.clone();
            let events = events.clone();
            let cancel = cancel.clone();
            Box::pin(async move {
                if cancel.is_cancelled() {
                    return;
                }
                debug!(peer_id = %peer_id, label = %channel.label(), "data channel announced");
                outbox.attach(channel.clone()).await;

                let (open_outbox, open_events, open_cancel) =
                    (outbox.clone(), events.clone(), cancel.clone());
                channel.on_open(Box::new(move || {
                    Box::pin(async move {
                        if open_cancel.is_cancelled() {
                            return;
                        }
                        if let Err(e) = open_outbox.mark_open().await {
                            warn!("failed to flush data channel: {}", e);
                        }
                        open_events.emit(DataChannelEvent::Opened);
                    })
                }));

                channel.on_close(Box::new(move || {
                    let outbox = outbox.clone();
                    let events = events.clone();
                    let cancel = cancel.clone();
                    Box::pin(async move {
                        if cancel.is_cancelled() {
                            return;
                        }
                        outbox.close().await;
                        events.emit(DataChannelEvent::Closed);
                    })
                }));
            })
        }));
    }

    {
        let peer_id = peer_id.to_string();
        let events = events.clone();
        let cancel = cancel.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let peer_id = peer_id.clone();
            let events = events.clone();
            let cancel = cancel.clone();
            Box::pin(async move {
                info!(peer_id = %peer_id, state = %state, "peer connection state changed");
                if matches!(
                    state,
                    RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
                ) && !cancel.is_cancelled()
                {
                    let error = TransportError::ConnectionLost(state.to_string());
                    events.emit(SessionLifecycle::Error {
                        message: error.to_string(),
                    });
                    cancel.cancel();
                }
            })
        }));
    }
}

/// Decode RTP from `track` into 48 kHz PCM until the peer is cancelled.
async fn read_inbound(
    peer_id: String,
    track: Arc<TrackRemote>,
    tx: mpsc::Sender<AudioChunk>,
    cancel: CancellationToken,
) {
    let mut decoder = match OpusDecoder::new() {
        Ok(decoder) => decoder,
        Err(e) => {
            warn!(peer_id = %peer_id, "cannot decode inbound audio: {}", e);
            return;
        }
    };

    let mut dropped = 0u64;
    loop {
        let packet = tokio::select! {
            _ = cancel.cancelled() => break,
            result = track.read_rtp() => match result {
                Ok((packet, _)) => packet,
                Err(e) => {
                    debug!(peer_id = %peer_id, "inbound track ended: {}", e);
                    break;
                }
            },
        };
        if packet.payload.is_empty() {
            continue;
        }

        let samples = match decoder.decode(&packet.payload) {
            Ok(samples) => samples,
            Err(e) => {
                debug!(peer_id = %peer_id, "dropping undecodable packet: {}", e);
                continue;
            }
        };

        match tx.try_send(AudioChunk::from_samples(&samples, OPUS_SAMPLE_RATE)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped += 1;
                if dropped.is_power_of_two() {
                    warn!(peer_id = %peer_id, dropped, "inbound audio queue full, dropping frames");
                }
            }
            Err(TrySendError::Closed(_)) => {
                debug!(peer_id = %peer_id, "inbound audio receiver gone");
                break;
            }
        }
    }
}
