//! Room session facade
//!
//! [`RoomClient`] owns one event bus and builds the peer session, bandwidth
//! controller and signaling channel around it. Each client is an isolated
//! session; nothing is shared between instances.

use crate::api::{
    ClientInfo, ControlPlane, CreateRoomRequest, HttpControlPlane, RegisterClientRequest,
    RegisteredClient, Room, StaticToken, TokenProvider,
};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::{Event, EventBus, SubscriptionId};
use crate::transport::{AlwaysOnline, Connectivity, PushSource, SignalingChannel, SseEventSource};
use crate::webrtc::{BandwidthController, PeerConnectionFactory, PeerSession};
use log::{info, warn};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Collaborators for a [`RoomClient`]; anything left unset gets the
/// reqwest/webrtc-rs default.
pub struct RoomClientBuilder {
    config: Config,
    factory: Option<Arc<dyn PeerConnectionFactory>>,
    api: Option<Arc<dyn ControlPlane>>,
    push: Option<Arc<dyn PushSource>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl RoomClientBuilder {
    pub fn factory(mut self, factory: Arc<dyn PeerConnectionFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    pub fn control_plane(mut self, api: Arc<dyn ControlPlane>) -> Self {
        self.api = Some(api);
        self
    }

    pub fn push_source(mut self, push: Arc<dyn PushSource>) -> Self {
        self.push = Some(push);
        self
    }

    pub fn connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn build(self) -> Result<RoomClient> {
        let config = self.config;
        config.validate()?;

        let tokens = self
            .tokens
            .unwrap_or_else(|| Arc::new(StaticToken::new(config.api.token.clone())));
        let api: Arc<dyn ControlPlane> = match self.api {
            Some(api) => api,
            None => Arc::new(HttpControlPlane::new(&config.api, tokens.clone())?),
        };
        let push: Arc<dyn PushSource> = match self.push {
            Some(push) => push,
            None => Arc::new(SseEventSource::new(&config.api, tokens)?),
        };
        let connectivity = self
            .connectivity
            .unwrap_or_else(|| Arc::new(AlwaysOnline));
        let factory = match self.factory {
            Some(factory) => factory,
            None => default_factory()?,
        };

        let bus = Arc::new(EventBus::new());
        let session = PeerSession::new(&config, factory, api.clone(), bus.clone());
        let bandwidth = BandwidthController::new(session.clone(), &config.bandwidth);
        let channel = SignalingChannel::new(
            session.clone(),
            api.clone(),
            push,
            connectivity,
            &config.signaling,
        );

        let mut subscriptions = vec![session.bind(), bandwidth.bind(&bus), channel.bind()];
        subscriptions.push(close_on_terminal_channel(&bus, &session));

        Ok(RoomClient {
            config,
            bus,
            api,
            session,
            bandwidth,
            channel,
            subscriptions,
        })
    }
}

#[cfg(feature = "webrtc-native")]
fn default_factory() -> Result<Arc<dyn PeerConnectionFactory>> {
    Ok(Arc::new(
        crate::webrtc::peer_connection::NativePeerConnectionFactory::new()?,
    ))
}

#[cfg(not(feature = "webrtc-native"))]
fn default_factory() -> Result<Arc<dyn PeerConnectionFactory>> {
    Err(Error::FeatureDisabled)
}

/// A dead signaling channel takes the peer session down with it.
fn close_on_terminal_channel(bus: &EventBus, session: &Arc<PeerSession>) -> SubscriptionId {
    let weak = Arc::downgrade(session);
    bus.subscribe(move |event| {
        let Event::ChannelClosed { reason } = event else {
            return;
        };
        if !reason.is_terminal() {
            return;
        }
        if let Some(session) = weak.upgrade() {
            warn!("Signaling channel closed ({}), closing peer session", reason);
            tokio::spawn(async move {
                if let Err(e) = session.disconnect().await {
                    warn!("Failed to close peer session: {}", e);
                }
            });
        }
    })
}

pub struct RoomClient {
    config: Config,
    bus: Arc<EventBus>,
    api: Arc<dyn ControlPlane>,
    session: Arc<PeerSession>,
    bandwidth: Arc<BandwidthController>,
    channel: Arc<SignalingChannel>,
    subscriptions: Vec<SubscriptionId>,
}

impl RoomClient {
    pub fn builder(config: Config) -> RoomClientBuilder {
        RoomClientBuilder {
            config,
            factory: None,
            api: None,
            push: None,
            connectivity: None,
            tokens: None,
        }
    }

    /// Client backed by reqwest and webrtc-rs.
    pub fn new(config: Config) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn bus(&self) -> Arc<EventBus> {
        self.bus.clone()
    }

    pub fn session(&self) -> Arc<PeerSession> {
        self.session.clone()
    }

    pub fn bandwidth(&self) -> Arc<BandwidthController> {
        self.bandwidth.clone()
    }

    pub fn channel(&self) -> Arc<SignalingChannel> {
        self.channel.clone()
    }

    pub fn api(&self) -> Arc<dyn ControlPlane> {
        self.api.clone()
    }

    pub async fn connect(&self, room_id: &str, client_id: &str) -> Result<()> {
        self.session.connect(room_id, client_id).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.session.disconnect().await
    }

    /// Register in `room_id` and open the peer session for the new client.
    pub async fn join(&self, room_id: &str, request: RegisterClientRequest) -> Result<RegisteredClient> {
        let client = self.register_client(room_id, request).await?;
        self.connect(room_id, &client.client_id).await?;
        info!("Joined room {} as {}", room_id, client.client_id);
        Ok(client)
    }

    /// Close the peer session and tell the server the client left.
    pub async fn leave(&self, use_beacon: bool) -> Result<()> {
        let (Some(room_id), Some(client_id)) = (self.session.room_id(), self.session.client_id())
        else {
            return Err(Error::NotConnected);
        };
        self.session.disconnect().await?;
        self.leave_room(&room_id, &client_id, use_beacon).await
    }

    pub async fn create_room(&self, request: CreateRoomRequest) -> Result<Room> {
        self.api.create_room(request).await
    }

    pub async fn get_room(&self, room_id: &str) -> Result<Room> {
        self.api.get_room(room_id).await
    }

    /// Server-assigned bitrates replace the configured ones.
    pub async fn register_client(
        &self,
        room_id: &str,
        request: RegisterClientRequest,
    ) -> Result<RegisteredClient> {
        let client = self.api.register_client(room_id, request).await?;
        if let Some(bitrates) = client.bitrates {
            self.session.set_bitrates(bitrates);
        }
        Ok(client)
    }

    pub async fn get_client(&self, room_id: &str, client_id: &str) -> Result<ClientInfo> {
        self.api.get_client(room_id, client_id).await
    }

    pub async fn set_client_name(
        &self,
        room_id: &str,
        client_id: &str,
        name: &str,
    ) -> Result<ClientInfo> {
        self.api.set_client_name(room_id, client_id, name).await
    }

    pub async fn get_metadata(&self, room_id: &str) -> Result<Map<String, Value>> {
        self.api.get_metadata(room_id).await
    }

    pub async fn set_metadata(&self, room_id: &str, metadata: Map<String, Value>) -> Result<()> {
        self.api.set_metadata(room_id, metadata).await
    }

    pub async fn delete_metadata(&self, room_id: &str, key: &str) -> Result<()> {
        self.api.delete_metadata(room_id, key).await
    }

    pub async fn leave_room(&self, room_id: &str, client_id: &str, use_beacon: bool) -> Result<()> {
        self.api.leave_room(room_id, client_id, use_beacon).await
    }

    pub async fn end_room(&self, room_id: &str) -> Result<()> {
        self.api.end_room(room_id).await
    }
}

impl Drop for RoomClient {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.bus.unsubscribe(id);
        }
        self.channel.disconnect();
        self.bandwidth.stop();
    }
}
