//! AWL protocol client
//!
//! Owns one authenticated Symphony session: HTTP cookie login, WebSocket
//! endpoint discovery, the JSON command protocol, and the session-renewal
//! race. Many concurrent logical requests are multiplexed over the single
//! socket through the transaction table.
//!
//! Symphony force-closes sessions after a fixed interval of being logged in
//! (1500 s in the vendor dashboard), so a renewal timer runs alongside the
//! receive loop and, when it fires first, the client re-authenticates and
//! reopens the socket without surfacing a disconnect to callers. Whatever
//! was in flight at that moment is aborted by the table reset.

use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use regex::Regex;
use reqwest::cookie::CookieStore;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use super::payload::LoginPayload;
use super::transaction::TransactionTable;
use crate::types::{AwlError, Result};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Client identifier sent in every command frame
const COMMAND_SOURCE: &str = "consumer dashboard";

/// Baseline telemetry attributes requested for every gateway read
const GATEWAY_RLIST: &[&str] = &[
    "ActualCompressorSpeed",
    "AirflowCurrentSpeed",
    "AOCEnteringWaterTemp",
    "AuroraOutputCC",
    "AuroraOutputCC2",
    "AuroraOutputEH1",
    "AuroraOutputEH2",
    "auroraoutputrv",
    "auxpower",
    "AWLABCType",
    "AWLTStatType",
    "compressorpower",
    "dehumid_humid_sp",
    "EnteringWaterTemp",
    "fanpower",
    "homeautomationalarm1",
    "homeautomationalarm2",
    "humidity_offset_settings",
    "iz2_dehumid_humid_sp",
    "iz2_humidity_offset_settings",
    "lastfault",
    "lastlockout",
    "LeavingAirTemp",
    "lockoutstatus",
    "looppumppower",
    "ModeOfOperation",
    "totalunitpower",
    "TStatActiveSetpoint",
    "TStatCoolingSetpoint",
    "TStatDehumidSetpoint",
    "TStatHeatingSetpoint",
    "TStatMode",
    "TStatRelativeHumidity",
    "TStatRoomTemp",
];

/// Connection policy for one AWL client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Vendor login endpoint (POST login / GET logout)
    pub login_url: String,
    /// Vendor config script scanned for the live WebSocket endpoint
    pub config_url: String,
    /// Per-transaction response timeout
    pub transaction_timeout: Duration,
    /// How long a session may stay logged in before the client renews it;
    /// the vendor cuts sessions off at 1500 s
    pub renewal_interval: Duration,
    /// Grace period for the receive loop to stop during renewal
    pub cancel_grace: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            login_url: "https://symphony.mywaterfurnace.com/account/login".to_string(),
            config_url: "https://symphony.mywaterfurnace.com/assets/js/awlconfig.js.php"
                .to_string(),
            transaction_timeout: Duration::from_secs(30),
            renewal_interval: Duration::from_secs(1500),
            cancel_grace: Duration::from_secs(5),
        }
    }
}

/// State shared between the client handle and its background session task
struct ClientShared {
    username: String,
    password: String,
    config: ClientConfig,
    login_url: reqwest::Url,
    http: reqwest::Client,
    jar: Arc<reqwest::cookie::Jar>,
    transactions: Arc<TransactionTable>,
    /// Replaced wholesale on every (re)login; readers get a snapshot
    login_data: RwLock<Option<LoginPayload>>,
    /// Write half of the socket; `None` when disconnected
    sink: Mutex<Option<WsSink>>,
}

/// One authenticated AWL session
///
/// Created by the reconnect supervisor, shared with request handlers via
/// `Arc`, torn down and rebuilt whenever the session ends.
pub struct AwlClient {
    shared: Arc<ClientShared>,
    session: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl AwlClient {
    pub fn new(username: &str, password: &str, config: ClientConfig) -> Result<Self> {
        let login_url = reqwest::Url::parse(&config.login_url)
            .map_err(|e| AwlError::Internal(format!("invalid login URL: {e}")))?;

        // The vendor's login form refuses to act without the legal
        // acknowledgment cookie already set on its domain
        let jar = Arc::new(reqwest::cookie::Jar::default());
        jar.add_cookie_str("legal-acknowledge=yes; Path=/", &login_url);

        let http = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| AwlError::Internal(format!("could not build HTTP client: {e}")))?;

        Ok(Self {
            shared: Arc::new(ClientShared {
                username: username.to_string(),
                password: password.to_string(),
                config,
                login_url,
                http,
                jar,
                transactions: TransactionTable::new(),
                login_data: RwLock::new(None),
                sink: Mutex::new(None),
            }),
            session: Mutex::new(None),
        })
    }

    /// Authenticate and bring up the full session.
    ///
    /// HTTP login, WebSocket endpoint discovery, socket open, then the
    /// `login` command as the first transaction after a table reset. Spawns
    /// the background session task (receive loop + renewal timer).
    pub async fn connect(&self) -> Result<()> {
        let shared = &self.shared;
        shared.http_login().await?;
        let endpoint = shared.discover_endpoint().await?;
        info!("discovered AWL websocket endpoint {}", endpoint);
        let stream = shared.open_socket(&endpoint).await?;

        // The receive loop must be running before the login response can
        // come back, so the session task starts first
        let handle = tokio::spawn(session_loop(Arc::clone(shared), stream, endpoint));
        *self.session.lock().await = Some(handle);

        shared.ws_login().await?;
        info!("logged in to AWL as {}", shared.username);
        Ok(())
    }

    /// Read telemetry for one gateway.
    ///
    /// The attribute list is the fixed baseline plus `iz2_z<i>_roomtemp` and
    /// `iz2_z<i>_activesettings` for every configured zone index. The
    /// response object is returned verbatim.
    pub async fn read(&self, gwid: &str, zone: u32) -> Result<Value> {
        let payload = self.login_payload().ok_or(AwlError::NotConnected)?;
        let rlist = read_attribute_list(payload.max_zones(gwid));
        self.shared
            .command(
                "read",
                json!({"awlid": gwid, "zone": zone, "rlist": rlist}),
            )
            .await
    }

    /// Close the socket and log out. Always succeeds from the caller's
    /// point of view; logout failures are logged and swallowed.
    pub async fn close(&self) {
        self.shared.teardown_socket().await;
    }

    /// Wait for the background session task to finish.
    ///
    /// Returns normally on an orderly closure; surfaces the typed error when
    /// the session ended because of an unexpected closure or a failed renewal.
    pub async fn wait_closed(&self) -> Result<()> {
        let handle = self.session.lock().await.take();
        match handle {
            None => Ok(()),
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Ok(()),
                Err(e) => Err(AwlError::Connection(format!("session task failed: {e}"))),
            },
        }
    }

    /// Snapshot of the current login payload, if logged in
    pub fn login_payload(&self) -> Option<LoginPayload> {
        self.shared.read_login()
    }

    /// Whether a socket is open and a login payload is established
    pub async fn is_connected(&self) -> bool {
        self.shared.sink.lock().await.is_some() && self.login_payload().is_some()
    }
}

impl ClientShared {
    /// POST the credential form to the vendor login endpoint.
    ///
    /// Redirects are not followed; any 2xx with a session cookie is success.
    async fn http_login(&self) -> Result<()> {
        let form = [
            ("op", "login"),
            ("redirect", "/"),
            ("emailaddress", self.username.as_str()),
            ("password", self.password.as_str()),
        ];
        let response = self
            .http
            .post(self.login_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AwlError::Connection(format!("could not connect to {}: {e}", self.login_url)))?;

        if !response.status().is_success() {
            return Err(AwlError::Login(format!(
                "login failed: {}",
                response.status()
            )));
        }
        if self.session_id().is_none() {
            return Err(AwlError::Login("login response carried no session cookie".into()));
        }
        Ok(())
    }

    /// GET logout; skipped entirely when no session cookie is present.
    async fn http_logout(&self) -> Result<()> {
        if self.session_id().is_none() {
            return Ok(());
        }
        let response = self
            .http
            .get(self.login_url.clone())
            .query(&[("op", "logout")])
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map_err(|e| AwlError::Login(format!("could not connect to logout: {e}")))?;
        if !response.status().is_success() && !response.status().is_redirection() {
            return Err(AwlError::Login(format!(
                "logout failed: {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Fetch the vendor config script and extract the live WebSocket URL.
    ///
    /// The endpoint is not static configuration; it has to be rediscovered
    /// on each fresh login (renewal reuses the one already known).
    async fn discover_endpoint(&self) -> Result<String> {
        static WSS_URI: OnceLock<Regex> = OnceLock::new();
        let pattern = WSS_URI.get_or_init(|| {
            Regex::new(r#"wss?://[^"']+"#).unwrap_or_else(|e| panic!("bad wss pattern: {e}"))
        });

        let response = self
            .http
            .get(&self.config.config_url)
            .send()
            .await
            .map_err(|e| AwlError::Connection(format!("could not connect to {}: {e}", self.config.config_url)))?;
        if !response.status().is_success() {
            return Err(AwlError::Login(format!(
                "unable to fetch AWL websockets URI: {}",
                response.status()
            )));
        }
        let body = response
            .text()
            .await
            .map_err(|e| AwlError::Connection(format!("config read failed: {e}")))?;

        match pattern.find(&body) {
            Some(m) => Ok(m.as_str().to_string()),
            None => Err(AwlError::Login(format!(
                "unable to find websockets URI in {}",
                self.config.config_url
            ))),
        }
    }

    /// Open the WebSocket and install the write half; returns the read half.
    async fn open_socket(&self, endpoint: &str) -> Result<WsStream> {
        let (socket, _response) = connect_async(endpoint).await.map_err(|e| match e {
            WsError::Url(e) => AwlError::Login(format!("invalid websockets URI: {e}")),
            e => AwlError::Connection(format!("unable to connect to AWL websockets URI: {e}")),
        })?;
        let (sink, stream) = socket.split();
        *self.sink.lock().await = Some(sink);
        Ok(stream)
    }

    /// Protocol login: reset the transaction table, then send `login` with
    /// the HTTP session identifier. The response becomes the login payload.
    async fn ws_login(&self) -> Result<LoginPayload> {
        let sessionid = self
            .session_id()
            .ok_or_else(|| AwlError::Login("no sessionid cookie for websocket login".into()))?;

        // Prior transaction ids are meaningless on a fresh login
        self.transactions.reset_all();

        let data = self.command("login", json!({"sessionid": sessionid})).await?;
        let payload = LoginPayload::new(data);
        *self.write_login() = Some(payload.clone());
        Ok(payload)
    }

    /// Send one command frame and await its response.
    ///
    /// The transaction is allocated and registered before the frame goes out
    /// so a fast reply can never beat the bookkeeping. A send failure on a
    /// closed socket resets the whole table and surfaces a connection error.
    async fn command(&self, cmd: &str, extras: Value) -> Result<Value> {
        if self.sink.lock().await.is_none() {
            return Err(AwlError::NotConnected);
        }
        if cmd != "login" && self.read_login().is_none() {
            return Err(AwlError::NotConnected);
        }

        let pending = self
            .transactions
            .allocate(self.config.transaction_timeout)?;

        let mut frame = match extras {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        frame.insert("cmd".into(), json!(cmd));
        frame.insert("tid".into(), json!(pending.id()));
        frame.insert("source".into(), json!(COMMAND_SOURCE));
        let text = Value::Object(frame).to_string();
        debug!("> {}", text);

        let send_result = {
            let mut guard = self.sink.lock().await;
            match guard.as_mut() {
                Some(sink) => sink.send(Message::Text(text)).await,
                // Closed between the check and the send; same as a failed send
                None => Err(WsError::ConnectionClosed),
            }
        };
        if let Err(e) = send_result {
            self.transactions.reset_all();
            return Err(AwlError::Connection(format!("websocket send failed: {e}")));
        }

        pending.wait().await
    }

    /// Route one inbound frame to its transaction.
    ///
    /// Frames without a tid are logged and dropped; a non-null, non-empty
    /// `err` field of any type aborts the transaction; anything else
    /// completes it with the whole object. A non-JSON frame is a protocol
    /// violation and kills the loop.
    fn dispatch_frame(&self, raw: &str) -> Result<()> {
        let data: Value = serde_json::from_str(raw).map_err(|e| {
            error!("malformed frame from AWL: {e}");
            AwlError::Connection(format!("malformed websocket frame: {e}"))
        })?;

        let Some(tid) = data.get("tid").and_then(Value::as_u64) else {
            error!("message came in without tid: {}", raw);
            return Ok(());
        };
        if tid == 0 || tid > 255 {
            error!("message with out-of-range tid {}: {}", tid, raw);
            return Ok(());
        }

        let err = match data.get("err") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if s.is_empty() => None,
            Some(Value::String(s)) => Some(s.clone()),
            // Some firmware reports errors as codes or objects
            Some(other) => Some(other.to_string()),
        };
        match err {
            Some(err) => self.transactions.abort(tid as u8, AwlError::Transaction(err)),
            None => self.transactions.complete(tid as u8, data),
        }
        Ok(())
    }

    /// Close the socket (idempotent) and log out quietly.
    async fn teardown_socket(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.close().await {
                debug!("websocket close failed: {e}");
            }
        }
        if let Err(e) = self.http_logout().await {
            warn!("logout failed during close: {e}");
        }
    }

    /// Session identifier issued by the HTTP login, read from the cookie jar
    fn session_id(&self) -> Option<String> {
        let header = self.jar.cookies(&self.login_url)?;
        let cookies = header.to_str().ok()?;
        cookies.split("; ").find_map(|pair| {
            pair.strip_prefix("sessionid=").map(str::to_string)
        })
    }

    fn read_login(&self) -> Option<LoginPayload> {
        self.login_data
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn write_login(&self) -> std::sync::RwLockWriteGuard<'_, Option<LoginPayload>> {
        self.login_data.write().unwrap_or_else(|e| e.into_inner())
    }

    fn clear_login(&self) {
        *self.write_login() = None;
    }
}

/// Background session task: races the receive loop against the renewal timer.
///
/// Receive loop finishes first: the session is over, orderly or not, and the
/// result is surfaced through `wait_closed()`. Timer fires first: stop the
/// receive loop (bounded by the grace period), log out, log back in on the
/// already-discovered endpoint, and carry on with a fresh timer.
async fn session_loop(
    shared: Arc<ClientShared>,
    stream: WsStream,
    endpoint: String,
) -> Result<()> {
    let result = drive_session(Arc::clone(&shared), stream, endpoint).await;
    if result.is_err() {
        // The session is dead; in-flight requests must fail now rather than
        // sit out their own per-transaction timeouts
        shared.transactions.reset_all();
    }
    result
}

async fn drive_session(
    shared: Arc<ClientShared>,
    stream: WsStream,
    endpoint: String,
) -> Result<()> {
    let mut recv = tokio::spawn(receive_loop(Arc::clone(&shared), stream));
    loop {
        tokio::select! {
            joined = &mut recv => {
                return match joined {
                    Ok(result) => result,
                    Err(e) if e.is_cancelled() => Ok(()),
                    Err(e) => Err(AwlError::Connection(format!("receive loop failed: {e}"))),
                };
            }
            _ = tokio::time::sleep(shared.config.renewal_interval) => {
                info!("renewing AWL session before server-side timeout");
                recv.abort();
                if tokio::time::timeout(shared.config.cancel_grace, &mut recv)
                    .await
                    .is_err()
                {
                    return Err(AwlError::Connection(
                        "receive loop did not stop within the renewal grace period".into(),
                    ));
                }
                shared.teardown_socket().await;
                shared.http_login().await?;
                let stream = shared.open_socket(&endpoint).await?;
                recv = tokio::spawn(receive_loop(Arc::clone(&shared), stream));
                // Table reset inside ws_login aborts whatever was in flight
                shared.ws_login().await?;
                info!("AWL session renewed");
            }
        }
    }
}

/// Read frames off the socket and resolve transactions in arrival order.
async fn receive_loop(shared: Arc<ClientShared>, mut stream: WsStream) -> Result<()> {
    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Text(text)) => {
                debug!("< {}", text);
                shared.dispatch_frame(&text)?;
            }
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => {
                    debug!("< {}", text);
                    shared.dispatch_frame(text)?;
                }
                Err(_) => {
                    error!("non-UTF-8 binary frame from AWL");
                    return Err(AwlError::Connection("malformed websocket frame".into()));
                }
            },
            Ok(Message::Close(frame)) => {
                info!("AWL closed the websocket: {:?}", frame);
                break;
            }
            Ok(_) => {} // ping/pong handled by tungstenite
            Err(e) => {
                // Session is gone; readers must see NotConnected, not stale data
                shared.clear_login();
                return Err(AwlError::Connection(format!(
                    "websocket connection closed unexpectedly: {e}"
                )));
            }
        }
    }
    Ok(())
}

/// Baseline attribute list plus the two per-zone names for 1..=max_zones
fn read_attribute_list(max_zones: u32) -> Vec<String> {
    let mut rlist: Vec<String> = GATEWAY_RLIST.iter().map(|s| s.to_string()).collect();
    for zone in 1..=max_zones {
        rlist.push(format!("iz2_z{zone}_roomtemp"));
        rlist.push(format!("iz2_z{zone}_activesettings"));
    }
    rlist
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> AwlClient {
        AwlClient::new(
            "user@example.com",
            "hunter2",
            ClientConfig {
                login_url: "http://127.0.0.1:1/account/login".to_string(),
                config_url: "http://127.0.0.1:1/assets/js/awlconfig.js.php".to_string(),
                transaction_timeout: Duration::from_secs(5),
                ..ClientConfig::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn test_read_attribute_list_baseline_only() {
        let rlist = read_attribute_list(0);
        assert_eq!(rlist.len(), GATEWAY_RLIST.len());
        assert_eq!(rlist[0], "ActualCompressorSpeed");
        assert_eq!(rlist.last().unwrap(), "TStatRoomTemp");
    }

    #[test]
    fn test_read_attribute_list_adds_two_names_per_zone() {
        let rlist = read_attribute_list(3);
        assert_eq!(rlist.len(), GATEWAY_RLIST.len() + 6);
        for zone in 1..=3 {
            assert!(rlist.contains(&format!("iz2_z{zone}_roomtemp")));
            assert!(rlist.contains(&format!("iz2_z{zone}_activesettings")));
        }
        assert!(!rlist.iter().any(|a| a.contains("iz2_z4_")));
    }

    #[tokio::test]
    async fn test_dispatch_completes_matching_transaction_verbatim() {
        let client = client();
        let pending = client
            .shared
            .transactions
            .allocate(Duration::from_secs(5))
            .unwrap();
        let tid = pending.id();
        let frame = json!({"tid": tid, "roomtemp": 70, "iz2_z1_roomtemp": 68}).to_string();
        client.shared.dispatch_frame(&frame).unwrap();
        let got = pending.wait().await.unwrap();
        assert_eq!(got["roomtemp"], 70);
        assert_eq!(got["iz2_z1_roomtemp"], 68);
        assert_eq!(got["tid"], tid);
    }

    #[tokio::test]
    async fn test_dispatch_aborts_on_nonempty_err_field() {
        let client = client();
        let pending = client
            .shared
            .transactions
            .allocate(Duration::from_secs(5))
            .unwrap();
        let frame = json!({"tid": pending.id(), "err": "invalid gwid"}).to_string();
        client.shared.dispatch_frame(&frame).unwrap();
        match pending.wait().await {
            Err(AwlError::Transaction(msg)) => assert_eq!(msg, "invalid gwid"),
            other => panic!("expected transaction error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_non_string_err_field_also_aborts() {
        let client = client();
        let pending = client
            .shared
            .transactions
            .allocate(Duration::from_secs(5))
            .unwrap();
        let frame = json!({"tid": pending.id(), "err": 401}).to_string();
        client.shared.dispatch_frame(&frame).unwrap();
        match pending.wait().await {
            Err(AwlError::Transaction(msg)) => assert_eq!(msg, "401"),
            other => panic!("expected transaction error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_empty_err_field_still_completes() {
        let client = client();
        let pending = client
            .shared
            .transactions
            .allocate(Duration::from_secs(5))
            .unwrap();
        let frame = json!({"tid": pending.id(), "err": "", "ok": true}).to_string();
        client.shared.dispatch_frame(&frame).unwrap();
        assert_eq!(pending.wait().await.unwrap()["ok"], true);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_tid_is_a_noop() {
        let client = client();
        let pending = client
            .shared
            .transactions
            .allocate(Duration::from_secs(5))
            .unwrap();
        client
            .shared
            .dispatch_frame(&json!({"tid": 99, "stale": true}).to_string())
            .unwrap();
        assert_eq!(client.shared.transactions.live(), 1);
        client.shared.transactions.complete(pending.id(), Value::Null);
        assert!(pending.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_missing_tid_is_dropped() {
        let client = client();
        assert!(client
            .shared
            .dispatch_frame(&json!({"roomtemp": 70}).to_string())
            .is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_malformed_frame_is_fatal() {
        let client = client();
        assert!(matches!(
            client.shared.dispatch_frame("not json at all {"),
            Err(AwlError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_command_without_socket_is_not_connected() {
        let client = client();
        let err = client.shared.command("read", json!({})).await.unwrap_err();
        assert!(matches!(err, AwlError::NotConnected));
    }

    #[tokio::test]
    async fn test_read_without_login_payload_is_not_connected() {
        let client = client();
        let err = client.read("GW1", 0).await.unwrap_err();
        assert!(matches!(err, AwlError::NotConnected));
    }

    #[tokio::test]
    async fn test_wait_closed_without_session_returns_ok() {
        let client = client();
        assert!(client.wait_closed().await.is_ok());
    }
}
