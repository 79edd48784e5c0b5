//! FIX session lifecycle owner.
//!
//! Wraps a `quickfix` initiator: generates the engine settings file, runs
//! the engine on a dedicated thread (the engine objects live on that
//! thread's stack for their whole life), caches session state for cheap
//! reads, and dispatches inbound application messages to registered
//! listeners. Reconnection is the engine's own job; this wrapper only
//! broadcasts the resulting state transitions.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use quickfix::{
    send_to_target, Application, ApplicationCallback, ConnectionHandler, FileMessageStoreFactory,
    LogFactory, Message, MsgFromAdminError, MsgFromAppError, SessionId, SessionSettings,
    SocketInitiator, StdLogger,
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::mapper::{self, CancelReject, ExecutionReport, FixFields};
use super::types::TransportError;

pub const PROD_FIX_HOST: &str = "fix.elections.kalshi.com";
pub const DEMO_FIX_HOST: &str = "fix.demo.kalshi.co";

// ─────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FixConfig {
    pub host: String,
    /// 8228 is the no-retransmit endpoint, 8230 retransmits on resend.
    pub port: u16,
    /// Operator-provided UUID; without it FIX modes are unusable.
    pub sender_comp_id: String,
    pub target_comp_id: String,
    pub begin_string: String,
    pub heartbeat_secs: u64,
    pub reset_on_logon: bool,
    pub reconnect_secs: u64,
    /// The exchange refuses plain TCP; leave this on.
    pub tls: bool,
    /// Engine sequence store and generated settings file live here.
    pub scratch_dir: PathBuf,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            host: PROD_FIX_HOST.to_string(),
            port: 8228,
            sender_comp_id: String::new(),
            target_comp_id: default_target_comp_id(8228).to_string(),
            begin_string: "FIXT.1.1".to_string(),
            heartbeat_secs: 30,
            reset_on_logon: true,
            reconnect_secs: 5,
            tls: true,
            scratch_dir: std::env::temp_dir().join("kalshi-fix"),
        }
    }
}

pub fn default_target_comp_id(port: u16) -> &'static str {
    match port {
        8230 => "KalshiRT",
        _ => "KalshiNR",
    }
}

impl FixConfig {
    /// Load overrides from environment variables (if set).
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("KALSHI_FIX_HOST") {
            cfg.host = v;
        }
        if let Ok(v) = std::env::var("KALSHI_FIX_PORT") {
            if let Ok(port) = v.parse() {
                cfg.port = port;
                cfg.target_comp_id = default_target_comp_id(port).to_string();
            }
        }
        if let Ok(v) = std::env::var("KALSHI_FIX_SENDER_COMP_ID") {
            cfg.sender_comp_id = v;
        }
        if let Ok(v) = std::env::var("KALSHI_FIX_TARGET_COMP_ID") {
            cfg.target_comp_id = v;
        }
        if let Ok(v) = std::env::var("KALSHI_FIX_HEARTBEAT_SECS") {
            if let Ok(n) = v.parse() {
                cfg.heartbeat_secs = n;
            }
        }
        if let Ok(v) = std::env::var("KALSHI_FIX_RESET_ON_LOGON") {
            cfg.reset_on_logon = v != "0" && v.to_lowercase() != "false";
        }
        if let Ok(v) = std::env::var("KALSHI_FIX_RECONNECT_SECS") {
            if let Ok(n) = v.parse() {
                cfg.reconnect_secs = n;
            }
        }
        if let Ok(v) = std::env::var("KALSHI_FIX_TLS") {
            cfg.tls = v != "0" && v.to_lowercase() != "false";
        }
        if let Ok(v) = std::env::var("KALSHI_SCRATCH_DIR") {
            cfg.scratch_dir = PathBuf::from(v);
        }
        cfg
    }

    fn yes_no(flag: bool) -> &'static str {
        if flag {
            "Y"
        } else {
            "N"
        }
    }

    /// Render the QuickFIX settings file for this session.
    fn settings_contents(&self) -> String {
        format!(
            "[DEFAULT]\n\
             ConnectionType=initiator\n\
             ReconnectInterval={reconnect}\n\
             FileStorePath={store}\n\
             StartTime=00:00:00\n\
             EndTime=00:00:00\n\
             UseDataDictionary=N\n\
             \n\
             [SESSION]\n\
             BeginString={begin}\n\
             DefaultApplVerID=9\n\
             SenderCompID={sender}\n\
             TargetCompID={target}\n\
             HeartBtInt={heartbeat}\n\
             SocketConnectHost={host}\n\
             SocketConnectPort={port}\n\
             ResetOnLogon={reset}\n\
             SSLEnable={ssl}\n",
            reconnect = self.reconnect_secs,
            store = self.scratch_dir.join("store").display(),
            begin = self.begin_string,
            sender = self.sender_comp_id,
            target = self.target_comp_id,
            heartbeat = self.heartbeat_secs,
            host = self.host,
            port = self.port,
            reset = Self::yes_no(self.reset_on_logon),
            ssl = Self::yes_no(self.tls),
        )
    }

    fn write_settings_file(&self) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(self.scratch_dir.join("store"))?;
        let path = self.scratch_dir.join("sessions.ini");
        std::fs::write(&path, self.settings_contents())?;
        Ok(path)
    }
}

// ─────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Connecting,
    Connected,
    LogonSent,
    LoggedOn,
    LoggedOut,
    Disconnected,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::LogonSent => "logon_sent",
            SessionState::LoggedOn => "logged_on",
            SessionState::LoggedOut => "logged_out",
            SessionState::Disconnected => "disconnected",
            SessionState::Error => "error",
        }
    }
}

/// Inbound application-message consumer; registered before `start`.
/// Handlers run on the engine's inbound thread and must not block.
pub trait MessageListener: Send + Sync {
    fn on_execution_report(&self, report: &ExecutionReport);
    fn on_cancel_reject(&self, reject: &CancelReject);
    /// Session-level ("3") and business ("j") rejects; log-only consumers.
    fn on_reject(&self, msg_type: &str, fields: &FixFields);
}

type StateListener = Box<dyn Fn(SessionState) + Send + Sync>;

struct SessionCore {
    state: RwLock<SessionState>,
    logged_on: AtomicBool,
    stopping: AtomicBool,
    state_listeners: Mutex<Vec<StateListener>>,
    message_listeners: RwLock<Vec<Arc<dyn MessageListener>>>,
    logon_tx: watch::Sender<bool>,
}

impl SessionCore {
    fn new(logon_tx: watch::Sender<bool>) -> Self {
        Self {
            state: RwLock::new(SessionState::Created),
            logged_on: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            state_listeners: Mutex::new(Vec::new()),
            message_listeners: RwLock::new(Vec::new()),
            logon_tx,
        }
    }

    /// Transition and fan out to listeners in registration order. A
    /// panicking listener is contained and logged; the rest still run.
    fn set_state(&self, next: SessionState) {
        {
            let mut state = self.state.write();
            if *state == next {
                return;
            }
            *state = next;
        }
        self.logged_on
            .store(next == SessionState::LoggedOn, Ordering::SeqCst);
        let listeners = self.state_listeners.lock();
        for listener in listeners.iter() {
            if catch_unwind(AssertUnwindSafe(|| listener(next))).is_err() {
                warn!("state listener panicked on {}", next.as_str());
            }
        }
    }

    fn dispatch_app_message(&self, msg: &Message) {
        let raw = match msg.as_string() {
            Ok(raw) => raw,
            Err(err) => {
                warn!("unreadable application message: {err:?}");
                return;
            }
        };
        let fields = FixFields::parse(&raw);
        let listeners = self.message_listeners.read();
        match fields.msg_type() {
            Some(mapper::MSG_TYPE_EXECUTION_REPORT) => {
                match ExecutionReport::from_fields(&fields) {
                    Some(report) => {
                        for listener in listeners.iter() {
                            listener.on_execution_report(&report);
                        }
                    }
                    None => warn!("ExecutionReport without ExecType: {raw}"),
                }
            }
            Some(mapper::MSG_TYPE_ORDER_CANCEL_REJECT) => {
                let reject = CancelReject::from_fields(&fields);
                for listener in listeners.iter() {
                    listener.on_cancel_reject(&reject);
                }
            }
            Some(mapper::MSG_TYPE_BUSINESS_REJECT) => {
                for listener in listeners.iter() {
                    listener.on_reject(mapper::MSG_TYPE_BUSINESS_REJECT, &fields);
                }
            }
            other => debug!("unhandled application message type {other:?}"),
        }
    }

    fn dispatch_admin_message(&self, msg: &Message) {
        let Ok(raw) = msg.as_string() else {
            return;
        };
        let fields = FixFields::parse(&raw);
        if fields.msg_type() == Some(mapper::MSG_TYPE_SESSION_REJECT) {
            let listeners = self.message_listeners.read();
            for listener in listeners.iter() {
                listener.on_reject(mapper::MSG_TYPE_SESSION_REJECT, &fields);
            }
        }
    }
}

// ─────────────────────────────────────────────────────────
// Engine callbacks
// ─────────────────────────────────────────────────────────

struct RouterApplication {
    core: Arc<SessionCore>,
}

impl ApplicationCallback for RouterApplication {
    fn on_create(&self, _session: &SessionId) {
        debug!("FIX session created");
    }

    fn on_logon(&self, _session: &SessionId) {
        info!("🔑 FIX logon complete");
        self.core.set_state(SessionState::LoggedOn);
        self.core.logon_tx.send_replace(true);
    }

    fn on_logout(&self, _session: &SessionId) {
        let next = if self.core.stopping.load(Ordering::SeqCst) {
            SessionState::LoggedOut
        } else {
            // The engine re-initiates after ReconnectInterval; listeners
            // will see a fresh logon cycle.
            SessionState::Disconnected
        };
        warn!("FIX session {}", next.as_str());
        self.core.set_state(next);
        self.core.logon_tx.send_replace(false);
    }

    fn on_msg_from_app(&self, msg: &Message, _session: &SessionId) -> Result<(), MsgFromAppError> {
        self.core.dispatch_app_message(msg);
        Ok(())
    }

    fn on_msg_from_admin(
        &self,
        msg: &Message,
        _session: &SessionId,
    ) -> Result<(), MsgFromAdminError> {
        self.core.dispatch_admin_message(msg);
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────
// Manager
// ─────────────────────────────────────────────────────────

struct EngineHandle {
    stop_tx: std::sync::mpsc::Sender<()>,
    join: std::thread::JoinHandle<()>,
}

/// Owns the single exchange session. Constructing it opens no sockets;
/// `start` spawns the engine thread and the engine connects autonomously.
pub struct FixSessionManager {
    cfg: FixConfig,
    core: Arc<SessionCore>,
    logon_rx: watch::Receiver<bool>,
    engine: Mutex<Option<EngineHandle>>,
}

impl FixSessionManager {
    pub fn new(cfg: FixConfig) -> Self {
        let (logon_tx, logon_rx) = watch::channel(false);
        Self {
            cfg,
            core: Arc::new(SessionCore::new(logon_tx)),
            logon_rx,
            engine: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &FixConfig {
        &self.cfg
    }

    /// Register an inbound message consumer. Must happen before `start`.
    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) {
        self.core.message_listeners.write().push(listener);
    }

    /// Register a state-change callback. Must happen before `start`.
    pub fn on_state_change(&self, listener: impl Fn(SessionState) + Send + Sync + 'static) {
        self.core.state_listeners.lock().push(Box::new(listener));
    }

    pub fn state(&self) -> SessionState {
        *self.core.state.read()
    }

    /// Cached view of the last transition; true only while logged on.
    pub fn is_logged_on(&self) -> bool {
        self.core.logged_on.load(Ordering::SeqCst)
    }

    /// Spawn the engine thread and wait for it to come up. The engine then
    /// connects and logs on by itself; use [`await_logon`] for readiness.
    ///
    /// [`await_logon`]: FixSessionManager::await_logon
    pub fn start(&self) -> anyhow::Result<()> {
        let mut engine = self.engine.lock();
        if engine.is_some() {
            anyhow::bail!("FIX session already started");
        }
        if self.cfg.sender_comp_id.is_empty() {
            anyhow::bail!("sender comp ID is required to start a FIX session");
        }
        if !self.cfg.tls {
            warn!("⚠️ TLS disabled — the exchange rejects plain TCP sessions");
        }
        let settings_path = self.cfg.write_settings_file()?;
        info!(
            "🚀 starting FIX initiator {}:{} as {} → {}",
            self.cfg.host, self.cfg.port, self.cfg.sender_comp_id, self.cfg.target_comp_id
        );
        self.core.stopping.store(false, Ordering::SeqCst);
        self.core.set_state(SessionState::Connecting);

        let (startup_tx, startup_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();
        let core = Arc::clone(&self.core);
        let join = std::thread::Builder::new()
            .name("kalshi-fix-engine".into())
            .spawn(move || run_engine(settings_path, core, startup_tx, stop_rx))?;

        match startup_rx.recv_timeout(Duration::from_secs(15)) {
            Ok(Ok(())) => {
                *engine = Some(EngineHandle { stop_tx, join });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = join.join();
                Err(err)
            }
            Err(_) => {
                self.core.set_state(SessionState::Error);
                anyhow::bail!("timed out waiting for the FIX engine to start")
            }
        }
    }

    /// Block up to `timeout` for logon; false on timeout.
    pub async fn await_logon(&self, timeout: Duration) -> bool {
        let mut rx = self.logon_rx.clone();
        tokio::time::timeout(timeout, rx.wait_for(|logged_on| *logged_on))
            .await
            .map(|result| result.is_ok())
            .unwrap_or(false)
    }

    /// Commit a populated message to the wire. Fails `TransportUnavailable`
    /// while the session is anything but logged on.
    pub fn send(&self, msg: Message) -> Result<(), TransportError> {
        if !self.is_logged_on() {
            return Err(TransportError::TransportUnavailable(
                "FIX session is not logged on".into(),
            ));
        }
        let session_id = SessionId::try_new(
            &self.cfg.begin_string,
            &self.cfg.sender_comp_id,
            &self.cfg.target_comp_id,
            "",
        )
        .map_err(|err| {
            TransportError::TransportUnavailable(format!("invalid session id: {err:?}"))
        })?;
        send_to_target(msg, &session_id).map_err(|err| {
            TransportError::TransportUnavailable(format!("engine refused the message: {err:?}"))
        })
    }

    /// Stop the engine and drop the session. Idempotent.
    pub fn stop(&self) {
        let handle = self.engine.lock().take();
        if let Some(EngineHandle { stop_tx, join }) = handle {
            info!("🛑 stopping FIX initiator");
            self.core.stopping.store(true, Ordering::SeqCst);
            let _ = stop_tx.send(());
            if join.join().is_err() {
                warn!("FIX engine thread panicked during shutdown");
            }
            self.core.set_state(SessionState::LoggedOut);
        }
    }

    #[cfg(test)]
    fn force_state(&self, state: SessionState) {
        self.core.set_state(state);
    }
}

impl Drop for FixSessionManager {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Engine thread body. All `quickfix` objects live on this stack; the
/// thread parks on the stop channel while the engine runs its own
/// connect/logon/reconnect loop.
fn run_engine(
    settings_path: PathBuf,
    core: Arc<SessionCore>,
    startup_tx: std::sync::mpsc::Sender<anyhow::Result<()>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let outcome = (|| -> anyhow::Result<()> {
        let settings_path = settings_path.to_string_lossy();
        let settings = SessionSettings::try_from_path(settings_path.as_ref())
            .map_err(|err| anyhow::anyhow!("bad session settings: {err:?}"))?;
        let store_factory = FileMessageStoreFactory::try_new(&settings)
            .map_err(|err| anyhow::anyhow!("message store init failed: {err:?}"))?;
        let log_factory = LogFactory::try_new(&StdLogger::Stdout)
            .map_err(|err| anyhow::anyhow!("log factory init failed: {err:?}"))?;
        let callbacks = RouterApplication {
            core: Arc::clone(&core),
        };
        let app = Application::try_new(&callbacks)
            .map_err(|err| anyhow::anyhow!("application init failed: {err:?}"))?;
        let mut initiator =
            SocketInitiator::try_new(&settings, &app, &store_factory, &log_factory)
                .map_err(|err| anyhow::anyhow!("initiator init failed: {err:?}"))?;
        initiator
            .start()
            .map_err(|err| anyhow::anyhow!("initiator start failed: {err:?}"))?;
        let _ = startup_tx.send(Ok(()));

        // Park here for the session's whole life.
        let _ = stop_rx.recv();

        initiator
            .stop()
            .map_err(|err| anyhow::anyhow!("initiator stop failed: {err:?}"))?;
        Ok(())
    })();

    if let Err(err) = outcome {
        error!("FIX engine thread exited with error: {err:?}");
        core.set_state(SessionState::Error);
        let _ = startup_tx.send(Err(err));
    }
}
