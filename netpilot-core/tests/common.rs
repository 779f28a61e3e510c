#![allow(dead_code)]

use async_trait::async_trait;
use dashmap::DashMap;
use netpilot_core::{AutomationService, Collaborators};
use netpilot_models::{
    domain::prelude::{CommandIntent, Credential, CredentialRecord, Device, DeviceGroup},
    settings::{Inner, PlatformCommands, Settings},
    OutputParser,
};
use netpilot_sdk::{LoginCredential, Session, SessionConnector, SessionError, SessionResult, SessionTarget};
use netpilot_storage::{
    new_otp_cache, MemoryBackupStore, MemoryCredentialStore, MemoryInventory,
    StaticCommandCatalog,
};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Once,
    },
    time::Duration,
};
use tracing::Level;

pub const PLATFORM: &str = "cisco_ios";
pub const DEPARTMENT: &str = "netops";
pub const STATIC_CRED: &str = "cred-static";
pub const OTP_CRED: &str = "cred-otp";
pub const COLLECT_CMD: &str = "show running-config";
pub const SAVE_CMD: &str = "write memory";
pub const DISCOVER_CMD: &str = "show version";

static INIT_TRACING: Once = Once::new();

pub fn init_tracing() {
    INIT_TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_target(false)
            .without_time()
            .try_init();
    });
}

/// How a scripted device answers.
#[derive(Debug, Clone)]
pub enum Behaviour {
    /// Answers every command; `show running-config` returns the held text
    Healthy,
    /// Rejects the login
    AuthFail,
    /// TCP connect fails
    Unreachable,
    /// Connects, then never answers a command
    Hang,
    /// Rejects every configuration command
    RejectConfig,
}

#[derive(Default)]
struct Gauge {
    open: AtomicUsize,
    peak: AtomicUsize,
    connects: AtomicUsize,
}

impl Gauge {
    fn opened(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        self.connects.fetch_add(1, Ordering::SeqCst);
    }

    fn closed(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Connector whose devices are scripted per address.
#[derive(Default)]
pub struct FakeConnector {
    behaviours: DashMap<String, Behaviour>,
    configs: Arc<DashMap<String, String>>,
    /// Commands received, per address, in order
    journal: Arc<DashMap<String, Vec<String>>>,
    /// Passwords presented at login, per address
    logins: DashMap<String, Vec<String>>,
    latency: std::sync::Mutex<Duration>,
    gauge: Arc<Gauge>,
}

impl FakeConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, address: &str, behaviour: Behaviour) {
        self.behaviours.insert(address.to_string(), behaviour);
    }

    pub fn set_config(&self, address: &str, text: &str) {
        self.configs.insert(address.to_string(), text.to_string());
    }

    /// Every command takes this long to answer.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn open_sessions(&self) -> usize {
        self.gauge.open.load(Ordering::SeqCst)
    }

    pub fn peak_sessions(&self) -> usize {
        self.gauge.peak.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> usize {
        self.gauge.connects.load(Ordering::SeqCst)
    }

    pub fn commands(&self, address: &str) -> Vec<String> {
        self.journal
            .get(address)
            .map(|j| j.value().clone())
            .unwrap_or_default()
    }

    pub fn logins(&self, address: &str) -> Vec<String> {
        self.logins
            .get(address)
            .map(|l| l.value().clone())
            .unwrap_or_default()
    }

    /// Addresses that received at least one command.
    pub fn touched(&self) -> Vec<String> {
        let mut addresses: Vec<_> = self.journal.iter().map(|e| e.key().clone()).collect();
        addresses.sort();
        addresses
    }
}

#[async_trait]
impl SessionConnector for FakeConnector {
    fn name(&self) -> &str {
        "fake"
    }

    async fn connect(
        &self,
        target: &SessionTarget,
        credential: &LoginCredential,
    ) -> SessionResult<Box<dyn Session>> {
        self.logins
            .entry(target.address.clone())
            .or_default()
            .push(credential.password().to_string());

        let behaviour = self
            .behaviours
            .get(&target.address)
            .map(|b| b.value().clone())
            .unwrap_or(Behaviour::Healthy);
        match behaviour {
            Behaviour::Unreachable => {
                return Err(SessionError::Connection(format!(
                    "{} refused the connection",
                    target.address
                )))
            }
            Behaviour::AuthFail => {
                return Err(SessionError::Auth("bad password".into()));
            }
            _ => {}
        }

        self.gauge.opened();
        Ok(Box::new(FakeSession {
            address: target.address.clone(),
            behaviour,
            configs: Arc::clone(&self.configs),
            journal: Arc::clone(&self.journal),
            latency: *self.latency.lock().unwrap(),
            gauge: Arc::clone(&self.gauge),
            usable: AtomicBool::new(true),
            closed: false,
        }))
    }
}

struct FakeSession {
    address: String,
    behaviour: Behaviour,
    configs: Arc<DashMap<String, String>>,
    journal: Arc<DashMap<String, Vec<String>>>,
    latency: Duration,
    gauge: Arc<Gauge>,
    usable: AtomicBool,
    closed: bool,
}

impl FakeSession {
    async fn answer(&self, command: &str) -> SessionResult<()> {
        self.journal
            .entry(self.address.clone())
            .or_default()
            .push(command.to_string());
        if matches!(self.behaviour, Behaviour::Hang) {
            std::future::pending::<()>().await;
        }
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Session for FakeSession {
    fn is_usable(&self) -> bool {
        !self.closed && self.usable.load(Ordering::SeqCst)
    }

    async fn execute(&mut self, command: &str) -> SessionResult<String> {
        self.answer(command).await?;
        let output = match command {
            COLLECT_CMD => self
                .configs
                .get(&self.address)
                .map(|c| c.value().clone())
                .unwrap_or_else(|| format!("hostname {}\n", self.address)),
            DISCOVER_CMD => format!("{} Software, Version 15.2(4)", self.address),
            SAVE_CMD => "[OK]".to_string(),
            other => format!("% Unknown command: {other}"),
        };
        Ok(output)
    }

    async fn send_config(&mut self, commands: &[String]) -> SessionResult<String> {
        let mut echo = Vec::with_capacity(commands.len());
        for command in commands {
            self.answer(command).await?;
            if matches!(self.behaviour, Behaviour::RejectConfig) {
                return Err(SessionError::Command {
                    command: command.clone(),
                    output: "% Invalid input detected".into(),
                });
            }
            echo.push(format!("{command}\n"));
        }
        Ok(echo.concat())
    }

    async fn close(&mut self) {
        self.usable.store(false, Ordering::SeqCst);
    }
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            self.gauge.closed();
        }
    }
}

/// Turns `show version` output into `{ "version": ... }`.
pub struct VersionParser;

impl OutputParser for VersionParser {
    fn parse(
        &self,
        _platform: &str,
        intent: CommandIntent,
        output: &str,
    ) -> Option<serde_json::Value> {
        if intent != CommandIntent::Discover {
            return None;
        }
        let version = output.split("Version ").nth(1)?;
        Some(serde_json::json!({ "version": version.trim() }))
    }
}

pub fn device(id: &str, group: DeviceGroup) -> Device {
    Device {
        id: id.to_string(),
        name: String::new(),
        address: address(id),
        platform: PLATFORM.to_string(),
        department: DEPARTMENT.to_string(),
        group,
        credential_ref: STATIC_CRED.to_string(),
    }
}

pub fn otp_device(id: &str, group: DeviceGroup) -> Device {
    Device {
        credential_ref: OTP_CRED.to_string(),
        ..device(id, group)
    }
}

#[inline]
pub fn address(id: &str) -> String {
    format!("{id}.lab")
}

pub fn ids(ids: &[&str]) -> Vec<String> {
    ids.iter().map(|s| s.to_string()).collect()
}

pub fn catalog() -> StaticCommandCatalog {
    let mut platforms = HashMap::new();
    platforms.insert(
        PLATFORM.to_string(),
        PlatformCommands {
            collect_config: vec![COLLECT_CMD.into()],
            save_config: vec![SAVE_CMD.into()],
            discover: vec![DISCOVER_CMD.into()],
            probe: vec!["show clock".into()],
        },
    );
    StaticCommandCatalog::new(platforms)
}

/// Defaults tuned for tests; `tweak` adjusts them further.
pub fn settings(tweak: impl FnOnce(&mut Inner)) -> Settings {
    let mut inner = Inner::default();
    inner.pool.max_connections = 4;
    inner.pool.acquire_timeout_ms = 60_000;
    inner.executor.fan_out = 8;
    inner.executor.collect_timeout_ms = 5_000;
    inner.executor.push_timeout_ms = 5_000;
    inner.executor.probe_timeout_ms = 5_000;
    tweak(&mut inner);
    Settings::from_inner(inner)
}

pub struct Harness {
    pub service: AutomationService,
    pub connector: Arc<FakeConnector>,
    pub backups: Arc<MemoryBackupStore>,
    pub inventory: Arc<MemoryInventory>,
    pub settings: Settings,
}

impl Harness {
    pub fn new(settings: Settings, devices: Vec<Device>) -> Self {
        init_tracing();
        let connector = FakeConnector::new();
        let backups = Arc::new(MemoryBackupStore::new());
        let inventory = Arc::new(MemoryInventory::new(devices));
        let credentials = Arc::new(MemoryCredentialStore::new([
            CredentialRecord {
                id: STATIC_CRED.into(),
                credential: Credential::Static {
                    username: "admin".into(),
                    password: "static-pass".into(),
                    enable_secret: None,
                },
            },
            CredentialRecord {
                id: OTP_CRED.into(),
                credential: Credential::OtpSeeded {
                    username: "operator".into(),
                    enable_secret: None,
                },
            },
        ]));

        let service = AutomationService::new(
            &settings,
            Collaborators {
                inventory: inventory.clone(),
                credentials,
                catalog: Arc::new(catalog()),
                backups: backups.clone(),
                connector: connector.clone(),
                otp_cache: Arc::new(new_otp_cache(&settings.otp)),
                parser: Some(Arc::new(VersionParser)),
            },
        );

        Self {
            service,
            connector,
            backups,
            inventory,
            settings,
        }
    }
}
