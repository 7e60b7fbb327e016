use std::time::Duration;

use rumqttc::{AsyncClient, Event, EventLoop, Incoming, LastWill, MqttOptions, QoS};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use knx_thermostat_common::{
    Command, CommandSource, MqttConfig, MqttTopics, ProtocolAdapter, ThermostatMode,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const INBOX_CAPACITY: usize = 32;

/// MQTT bridge. The rumqttc event loop runs on its own task and only queues
/// parsed commands; they reach the protocol manager when the control loop
/// calls [`ProtocolAdapter::receive_commands`].
pub struct MqttAdapter {
    client: AsyncClient,
    topics: MqttTopics,
    inbox: mpsc::Receiver<Command>,
}

impl MqttAdapter {
    /// Creates the client and spawns its event loop. Connection failures are
    /// retried in the background; they never fail startup.
    pub fn connect(config: &MqttConfig) -> Self {
        let host = std::env::var("MQTT_HOST").unwrap_or_else(|_| config.server.clone());
        let port = std::env::var("MQTT_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(config.port);
        let user = std::env::var("MQTT_USER").unwrap_or_else(|_| config.username.clone());
        let pass = std::env::var("MQTT_PASS").unwrap_or_else(|_| config.password.clone());

        let topics = MqttTopics::new(&config.topic_prefix);
        let mut options = MqttOptions::new(config.client_id.clone(), host.clone(), port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_last_will(LastWill::new(
            topics.status(),
            "offline",
            QoS::AtLeastOnce,
            true,
        ));
        if !user.is_empty() {
            options.set_credentials(user, pass);
        }

        let (client, eventloop) = AsyncClient::new(options, 64);
        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        spawn_event_loop(client.clone(), topics.clone(), eventloop, tx);
        info!("mqtt client for {host}:{port} under '{}'", config.topic_prefix);

        Self {
            client,
            topics,
            inbox,
        }
    }

    fn publish(&self, topic: String, payload: String) {
        if let Err(err) = self
            .client
            .try_publish(topic.as_str(), QoS::AtLeastOnce, true, payload)
        {
            warn!("mqtt publish to {topic} failed: {err}");
        }
    }
}

impl ProtocolAdapter for MqttAdapter {
    fn source(&self) -> CommandSource {
        CommandSource::Mqtt
    }

    fn receive_commands(&mut self, _now_ms: u64) -> Vec<Command> {
        let mut commands = Vec::new();
        while let Ok(command) = self.inbox.try_recv() {
            commands.push(command);
        }
        commands
    }

    fn command_outcome(&mut self, command: &Command, accepted: bool) {
        if !accepted {
            debug!("mqtt {} not applied", command.kind.as_str());
        }
    }

    fn send_temperature(&mut self, celsius: f32) {
        self.publish(self.topics.temperature(), format!("{celsius:.2}"));
    }

    fn send_setpoint(&mut self, celsius: f32) {
        self.publish(self.topics.setpoint(), format!("{celsius:.1}"));
    }

    fn send_valve_position(&mut self, percent: f32) {
        self.publish(self.topics.valve(), format!("{percent:.1}"));
    }

    fn send_mode(&mut self, mode: ThermostatMode) {
        self.publish(self.topics.mode(), mode.as_str().to_string());
    }

    fn send_heating_state(&mut self, heating: bool) {
        let payload = if heating { "ON" } else { "OFF" };
        self.publish(self.topics.heating(), payload.to_string());
    }
}

fn spawn_event_loop(
    client: AsyncClient,
    topics: MqttTopics,
    mut eventloop: EventLoop,
    tx: mpsc::Sender<Command>,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Some(command) = decode_publish(&topics, &message.topic, &message.payload) {
                        if let Err(err) = tx.try_send(command) {
                            warn!("mqtt command dropped: {err}");
                        }
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    // Subscriptions and availability are redone on every
                    // (re)connect since the session is not persistent.
                    if let Err(err) = client.try_subscribe(topics.command_filter(), QoS::AtLeastOnce) {
                        warn!("mqtt subscribe failed: {err}");
                    }
                    if let Err(err) = client.try_publish(topics.status(), QoS::AtLeastOnce, true, "online") {
                        warn!("mqtt availability publish failed: {err}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn decode_publish(topics: &MqttTopics, topic: &str, payload: &[u8]) -> Option<Command> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return None;
    }

    let Ok(message) = std::str::from_utf8(payload) else {
        warn!("dropping non utf8 MQTT payload on topic {topic}");
        return None;
    };

    match topics.parse_command(topic, message)? {
        Ok(command) => Some(command),
        Err(err) => {
            warn!("invalid MQTT command on {topic}: {err}");
            None
        }
    }
}
