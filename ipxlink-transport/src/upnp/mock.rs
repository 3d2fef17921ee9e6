//! In-process Internet Gateway Device for tests.
//!
//! Runs on plain threads so it keeps answering while a test blocks its own
//! runtime (for instance inside `Drop`). The SSDP responder listens on a
//! loopback UDP port instead of the multicast group; [`MockIgd::search_options`]
//! points discovery at it.

use std::{
    collections::BTreeSet,
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use super::{description::SERVICE_TYPES, ssdp::header, xml, SearchOptions};

const POLL: Duration = Duration::from_millis(20);
const DESCRIPTION_PATH: &str = "/rootDesc.xml";
const CONTROL_PATH: &str = "/ctl/IPConn";

#[derive(Debug, Clone)]
pub struct MockConfig {
    pub external_ip: String,
    /// Fault code returned for every `AddPortMapping`.
    pub add_fault: Option<u16>,
    /// Reject non-zero leases with fault 725.
    pub permanent_leases_only: bool,
    /// Stay silent on SSDP, as a network without a gateway would.
    pub answer_search: bool,
    pub service_type: String,
    /// Hold back the reply to one request: a SOAP action name, or
    /// `"description"` for the device description.
    pub stall: Option<(String, Duration)>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            external_ip: "203.0.113.77".into(),
            add_fault: None,
            permanent_leases_only: false,
            answer_search: true,
            service_type: SERVICE_TYPES[0].into(),
            stall: None,
        }
    }
}

/// One control request as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub action: String,
    pub body: String,
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<RecordedCall>,
    mappings: BTreeSet<(u16, String)>,
}

pub struct MockIgd {
    ssdp_addr: SocketAddr,
    http_addr: SocketAddr,
    state: Arc<Mutex<State>>,
    shutdown: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl MockIgd {
    pub fn start() -> io::Result<Self> {
        Self::with_config(MockConfig::default())
    }

    pub fn with_config(config: MockConfig) -> io::Result<Self> {
        let udp = UdpSocket::bind("127.0.0.1:0")?;
        udp.set_read_timeout(Some(POLL))?;
        let tcp = TcpListener::bind("127.0.0.1:0")?;
        tcp.set_nonblocking(true)?;

        let ssdp_addr = udp.local_addr()?;
        let http_addr = tcp.local_addr()?;
        let state = Arc::new(Mutex::new(State::default()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let config = Arc::new(config);

        let ssdp = {
            let shutdown = Arc::clone(&shutdown);
            let config = Arc::clone(&config);
            thread::spawn(move || serve_ssdp(&udp, http_addr, &config, &shutdown))
        };
        let http = {
            let shutdown = Arc::clone(&shutdown);
            let state = Arc::clone(&state);
            thread::spawn(move || serve_http(&tcp, &config, &state, &shutdown))
        };

        Ok(Self {
            ssdp_addr,
            http_addr,
            state,
            shutdown,
            threads: vec![ssdp, http],
        })
    }

    /// Discovery options aimed at this gateway.
    #[must_use]
    pub fn search_options(&self) -> SearchOptions {
        SearchOptions {
            target: self.ssdp_addr,
            bind: SocketAddr::from(([127, 0, 0, 1], 0)),
            timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(2),
        }
    }

    #[must_use]
    pub fn location(&self) -> String {
        format!("http://{}{DESCRIPTION_PATH}", self.http_addr)
    }

    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    /// Number of received control requests for `action`.
    #[must_use]
    pub fn count(&self, action: &str) -> usize {
        self.lock().calls.iter().filter(|c| c.action == action).count()
    }

    /// External ports with a live rule, ascending.
    #[must_use]
    pub fn mapped_ports(&self) -> Vec<u16> {
        self.lock().mappings.iter().map(|(port, _)| *port).collect()
    }

    /// Drop all rules without telling the client, as a router reboot would.
    pub fn forget_mappings(&self) {
        self.lock().mappings.clear();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for MockIgd {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for t in self.threads.drain(..) {
            let _ = t.join();
        }
    }
}

fn serve_ssdp(sock: &UdpSocket, http_addr: SocketAddr, config: &MockConfig, shutdown: &AtomicBool) {
    let mut buf = [0u8; 2048];
    while !shutdown.load(Ordering::Relaxed) {
        let Ok((len, from)) = sock.recv_from(&mut buf) else {
            continue;
        };
        let request = String::from_utf8_lossy(&buf[..len]);
        if !config.answer_search || !request.starts_with("M-SEARCH") {
            continue;
        }
        let st = header(&request, "ST").unwrap_or("upnp:rootdevice");
        let reply = format!(
            "HTTP/1.1 200 OK\r\n\
             CACHE-CONTROL: max-age=120\r\n\
             ST: {st}\r\n\
             USN: uuid:ipxlink-mock::{st}\r\n\
             LOCATION: http://{http_addr}{DESCRIPTION_PATH}\r\n\
             SERVER: mock/1.0 UPnP/1.1 MiniUPnPd/2.3\r\n\
             \r\n"
        );
        let _ = sock.send_to(reply.as_bytes(), from);
    }
}

fn serve_http(listener: &TcpListener, config: &MockConfig, state: &Mutex<State>, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _)) => {
                let _ = handle_connection(stream, config, state, shutdown);
            }
            Err(_) => thread::sleep(POLL),
        }
    }
}

fn handle_connection(
    mut stream: TcpStream,
    config: &MockConfig,
    state: &Mutex<State>,
    shutdown: &AtomicBool,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;

    let mut raw = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            return Ok(());
        }
        raw.extend_from_slice(&chunk[..n]);
        if let Some(pos) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };
    let head = String::from_utf8_lossy(&raw[..head_end]).into_owned();
    let body_len: usize = header(&head, "Content-Length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while raw.len() < head_end + body_len {
        let n = stream.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&raw[head_end..]).into_owned();

    let mut request_line = head.split_whitespace();
    let method = request_line.next().unwrap_or_default();
    let path = request_line.next().unwrap_or_default();

    let action = header(&head, "SOAPAction")
        .and_then(|v| v.trim_matches('"').rsplit_once('#'))
        .map(|(_, action)| action)
        .unwrap_or_default();
    let stage = if method == "GET" { "description" } else { action };
    if let Some((stalled, delay)) = &config.stall {
        if stalled.as_str() == stage {
            pause(*delay, shutdown);
        }
    }

    let (status, reply) = match (method, path) {
        ("GET", DESCRIPTION_PATH) => ("200 OK", description(config)),
        ("POST", CONTROL_PATH) => control(action, body, config, state),
        _ => ("404 Not Found", String::new()),
    };

    let response = format!(
        "HTTP/1.1 {status}\r\n\
         Content-Type: text/xml; charset=\"utf-8\"\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n{reply}",
        reply.len()
    );
    stream.write_all(response.as_bytes())?;
    stream.flush()
}

/// Sleep for `delay`, waking early on shutdown.
fn pause(delay: Duration, shutdown: &AtomicBool) {
    let until = Instant::now() + delay;
    while Instant::now() < until && !shutdown.load(Ordering::Relaxed) {
        thread::sleep(POLL);
    }
}

fn description(config: &MockConfig) -> String {
    format!(
        r#"<?xml version="1.0"?>
<root xmlns="urn:schemas-upnp-org:device-1-0">
<specVersion><major>1</major><minor>0</minor></specVersion>
<device>
<deviceType>urn:schemas-upnp-org:device:InternetGatewayDevice:1</deviceType>
<friendlyName>Mock Gateway</friendlyName>
<deviceList><device>
<deviceType>urn:schemas-upnp-org:device:WANDevice:1</deviceType>
<deviceList><device>
<deviceType>urn:schemas-upnp-org:device:WANConnectionDevice:1</deviceType>
<serviceList><service>
<serviceType>{st}</serviceType>
<serviceId>urn:upnp-org:serviceId:WANIPConn1</serviceId>
<controlURL>{CONTROL_PATH}</controlURL>
<eventSubURL>/evt/IPConn</eventSubURL>
<SCPDURL>/WANIPCn.xml</SCPDURL>
</service></serviceList>
</device></deviceList>
</device></deviceList>
</device>
</root>"#,
        st = config.service_type
    )
}

fn control(action: &str, body: String, config: &MockConfig, state: &Mutex<State>) -> (&'static str, String) {
    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    let key = (
        xml::text(&body, "NewExternalPort")
            .and_then(|p| p.parse().ok())
            .unwrap_or(0),
        xml::text(&body, "NewProtocol").unwrap_or_default(),
    );
    let lease = xml::text(&body, "NewLeaseDuration").unwrap_or_default();
    state.calls.push(RecordedCall {
        action: action.to_string(),
        body,
    });

    let st = &config.service_type;
    match action {
        "GetExternalIPAddress" => ok(
            action,
            st,
            &format!("<NewExternalIPAddress>{}</NewExternalIPAddress>", config.external_ip),
        ),
        "AddPortMapping" => {
            if let Some(code) = config.add_fault {
                return fault(code, "MockFault");
            }
            if config.permanent_leases_only && lease != "0" {
                return fault(725, "OnlyPermanentLeasesSupported");
            }
            state.mappings.insert(key);
            ok(action, st, "")
        }
        "DeletePortMapping" => {
            if state.mappings.remove(&key) {
                ok(action, st, "")
            } else {
                fault(714, "NoSuchEntryInArray")
            }
        }
        "GetSpecificPortMappingEntry" => {
            if state.mappings.contains(&key) {
                ok(action, st, "<NewInternalPort>0</NewInternalPort><NewEnabled>1</NewEnabled>")
            } else {
                fault(714, "NoSuchEntryInArray")
            }
        }
        _ => fault(401, "Invalid Action"),
    }
}

fn ok(action: &str, service_type: &str, inner: &str) -> (&'static str, String) {
    (
        "200 OK",
        format!(
            "<?xml version=\"1.0\"?>\r\n\
             <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
             s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\"><s:Body>\
             <u:{action}Response xmlns:u=\"{service_type}\">{inner}</u:{action}Response>\
             </s:Body></s:Envelope>"
        ),
    )
}

fn fault(code: u16, description: &str) -> (&'static str, String) {
    (
        "500 Internal Server Error",
        format!(
            "<?xml version=\"1.0\"?>\r\n\
             <s:Envelope xmlns:s=\"http://schemas.xmlsoap.org/soap/envelope/\" \
             s:encodingStyle=\"http://schemas.xmlsoap.org/soap/encoding/\"><s:Body><s:Fault>\
             <faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring><detail>\
             <UPnPError xmlns=\"urn:schemas-upnp-org:control-1-0\">\
             <errorCode>{code}</errorCode><errorDescription>{description}</errorDescription>\
             </UPnPError></detail></s:Fault></s:Body></s:Envelope>"
        ),
    )
}
