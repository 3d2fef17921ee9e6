use std::{
    net::Ipv4Addr,
    sync::{Arc, Mutex},
    time::Duration,
};

use ipxlink_core::{IpxConfig, IpxError, IpxResult, LaunchSequence, DEFAULT_PORT};
use ipxlink_session::{GameRef, HostRequest, Launcher, SessionOrchestrator, UpnpOutcome};
use ipxlink_transport::{
    upnp::{
        mock::{MockConfig, MockIgd},
        CONFLICT_IN_MAPPING_ENTRY,
    },
    SearchOptions,
};

const LAN: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 20);
const OVERRIDE: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 5);

/// Records launches instead of starting an emulator.
#[derive(Clone, Default)]
struct RecordingLauncher {
    launches: Arc<Mutex<Vec<LaunchSequence>>>,
}

impl RecordingLauncher {
    fn launches(&self) -> Vec<LaunchSequence> {
        self.launches.lock().unwrap().clone()
    }

    fn first_commands(&self) -> Vec<String> {
        self.launches()[0].commands().collect()
    }
}

impl Launcher for RecordingLauncher {
    fn launch(&self, _game: &GameRef, sequence: &LaunchSequence) -> IpxResult<()> {
        self.launches.lock().unwrap().push(sequence.clone());
        Ok(())
    }
}

struct FailingLauncher;

impl Launcher for FailingLauncher {
    fn launch(&self, _game: &GameRef, _sequence: &LaunchSequence) -> IpxResult<()> {
        Err(IpxError::Launch("emulator missing".into()))
    }
}

fn game() -> GameRef {
    GameRef::new("/games", "doom/DOOM.EXE -net")
}

fn orchestrator<L: Launcher>(launcher: L, search: SearchOptions) -> SessionOrchestrator<L> {
    SessionOrchestrator::new(&IpxConfig::default(), launcher)
        .with_search_options(search)
        .with_local_address(LAN)
}

fn unreachable_gateway() -> SearchOptions {
    SearchOptions {
        target: "127.0.0.1:9".parse().unwrap(),
        bind: "127.0.0.1:0".parse().unwrap(),
        timeout: Duration::from_millis(200),
        request_timeout: Duration::from_millis(500),
    }
}

#[tokio::test]
async fn lan_host_starts_server_first() {
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), unreachable_gateway());

    let session = orch.host(&game(), HostRequest::lan(DEFAULT_PORT)).await.unwrap();
    let status = session.status();
    assert_eq!(status.lan_address, Some(LAN));
    assert_eq!(status.code, None);
    assert_eq!(status.upnp, UpnpOutcome::NotRequested);
    assert!(!session.holds_mapping());

    assert_eq!(
        launcher.first_commands(),
        vec!["IPXNET STARTSERVER 19900", "CD doom", "DOOM.EXE -net"]
    );
    session.close().await;
}

#[tokio::test]
async fn internet_host_maps_exactly_one_port_and_close_releases_it() {
    let igd = MockIgd::start().unwrap();
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), igd.search_options());

    let session = orch.host(&game(), HostRequest::internet(DEFAULT_PORT)).await.unwrap();
    assert_eq!(session.active_mappings().len(), 1);
    assert_eq!(session.active_mappings()[0].internal_client, LAN);
    assert_eq!(igd.count("AddPortMapping"), 1);
    assert_eq!(igd.mapped_ports(), vec![DEFAULT_PORT]);

    let status = session.status().clone();
    assert!(matches!(status.upnp, UpnpOutcome::Mapped { verified: true, .. }));
    assert_eq!(status.public_address, Some(Ipv4Addr::new(203, 0, 113, 77)));
    assert!(status.code.is_some());
    assert_eq!(launcher.launches().len(), 1);

    session.close().await;
    assert_eq!(igd.count("DeletePortMapping"), 1);
    assert!(igd.mapped_ports().is_empty());
}

#[tokio::test]
async fn dropping_the_session_still_releases_the_mapping() {
    let igd = MockIgd::start().unwrap();
    let orch = orchestrator(RecordingLauncher::default(), igd.search_options());

    let session = orch.host(&game(), HostRequest::internet(DEFAULT_PORT)).await.unwrap();
    assert!(session.holds_mapping());
    drop(session);

    assert_eq!(igd.count("DeletePortMapping"), 1);
    assert!(igd.mapped_ports().is_empty());
}

#[tokio::test]
async fn conflict_degrades_to_manual_forwarding() {
    let igd = MockIgd::with_config(MockConfig {
        add_fault: Some(CONFLICT_IN_MAPPING_ENTRY),
        ..MockConfig::default()
    })
    .unwrap();
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), igd.search_options());

    let request = HostRequest {
        public_ip: Some(OVERRIDE),
        ..HostRequest::internet(DEFAULT_PORT)
    };
    let session = orch.host(&game(), request).await.unwrap();
    let status = session.status();
    match &status.upnp {
        UpnpOutcome::Failed { reason, .. } => assert!(reason.contains("already mapped"), "{reason}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(!session.holds_mapping());
    assert_eq!(status.code.as_ref().map(|c| c.as_str()), Some("TORCH-00MBP"));
    assert_eq!(launcher.launches().len(), 1);
    assert!(status.to_string().contains("manually"));
}

#[tokio::test]
async fn failed_mapping_still_uses_reported_wan_address() {
    let igd = MockIgd::with_config(MockConfig {
        add_fault: Some(CONFLICT_IN_MAPPING_ENTRY),
        ..MockConfig::default()
    })
    .unwrap();
    let orch = orchestrator(RecordingLauncher::default(), igd.search_options());

    let session = orch.host(&game(), HostRequest::internet(DEFAULT_PORT)).await.unwrap();
    assert_eq!(session.status().public_address, Some(Ipv4Addr::new(203, 0, 113, 77)));
}

#[tokio::test]
async fn no_gateway_with_override_still_hosts() {
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), unreachable_gateway());

    let request = HostRequest {
        public_ip: Some(OVERRIDE),
        ..HostRequest::internet(DEFAULT_PORT)
    };
    let session = orch.host(&game(), request).await.unwrap();
    match &session.status().upnp {
        UpnpOutcome::Failed { reason, .. } => assert!(reason.contains("No UPnP gateway"), "{reason}"),
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(launcher.launches().len(), 1);
}

#[tokio::test]
async fn skip_upnp_without_override_launches_nothing() {
    let igd = MockIgd::start().unwrap();
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), igd.search_options());

    let request = HostRequest {
        skip_upnp: true,
        ..HostRequest::internet(DEFAULT_PORT)
    };
    let err = orch.host(&game(), request).await.unwrap_err();
    assert!(matches!(err, IpxError::MissingPublicAddress));
    assert!(launcher.launches().is_empty());
    assert!(igd.calls().is_empty());
}

#[tokio::test]
async fn override_code_is_deterministic() {
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), unreachable_gateway());
    let request = HostRequest {
        public_ip: Some(OVERRIDE),
        skip_upnp: true,
        ..HostRequest::internet(DEFAULT_PORT)
    };

    let first = orch.host(&game(), request).await.unwrap();
    let second = orch.host(&game(), request).await.unwrap();
    let code = first.status().code.clone().unwrap();
    assert_eq!(code.as_str(), "TORCH-00MBP");
    assert_eq!(second.status().code.as_ref(), Some(&code));
    assert_eq!(first.status().upnp, UpnpOutcome::Skipped);
}

#[tokio::test]
async fn private_wan_address_is_refused_and_mapping_released() {
    let igd = MockIgd::with_config(MockConfig {
        external_ip: "100.64.12.34".into(),
        ..MockConfig::default()
    })
    .unwrap();
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), igd.search_options());

    let err = orch
        .host(&game(), HostRequest::internet(DEFAULT_PORT))
        .await
        .unwrap_err();
    assert!(matches!(err, IpxError::MissingPublicAddress));
    assert_eq!(igd.count("AddPortMapping"), 1);
    assert_eq!(igd.count("DeletePortMapping"), 1);
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn unspecified_wan_address_is_refused_and_mapping_released() {
    let igd = MockIgd::with_config(MockConfig {
        external_ip: "0.0.0.0".into(),
        ..MockConfig::default()
    })
    .unwrap();
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), igd.search_options());

    let err = orch
        .host(&game(), HostRequest::internet(DEFAULT_PORT))
        .await
        .unwrap_err();
    assert!(matches!(err, IpxError::MissingPublicAddress));
    assert!(igd.mapped_ports().is_empty());
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn abandoned_host_releases_mapping() {
    let igd = MockIgd::with_config(MockConfig {
        stall: Some(("GetSpecificPortMappingEntry".into(), Duration::from_millis(1500))),
        ..MockConfig::default()
    })
    .unwrap();
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), igd.search_options());

    let game_def = game();
    let hosting = orch.host(&game_def, HostRequest::internet(DEFAULT_PORT));
    assert!(tokio::time::timeout(Duration::from_millis(500), hosting).await.is_err());

    assert_eq!(igd.count("AddPortMapping"), 1);
    assert_eq!(igd.count("DeletePortMapping"), 1);
    assert!(igd.mapped_ports().is_empty());
    assert!(launcher.launches().is_empty());
}

#[tokio::test]
async fn launch_failure_releases_mapping() {
    let igd = MockIgd::start().unwrap();
    let orch = orchestrator(FailingLauncher, igd.search_options());

    let err = orch
        .host(&game(), HostRequest::internet(DEFAULT_PORT))
        .await
        .unwrap_err();
    assert!(matches!(err, IpxError::Launch(_)));
    assert!(igd.mapped_ports().is_empty());
}

#[tokio::test]
async fn internet_only_flags_need_internet() {
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), unreachable_gateway());

    let request = HostRequest {
        public_ip: Some(OVERRIDE),
        ..HostRequest::lan(DEFAULT_PORT)
    };
    assert!(matches!(orch.host(&game(), request).await, Err(IpxError::Usage(_))));

    let request = HostRequest {
        skip_upnp: true,
        ..HostRequest::lan(DEFAULT_PORT)
    };
    assert!(matches!(orch.host(&game(), request).await, Err(IpxError::Usage(_))));
    assert!(launcher.launches().is_empty());
}

#[test]
fn join_by_address_connects_first() {
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), unreachable_gateway());

    let status = orch.join(&game(), "192.168.1.42", DEFAULT_PORT).unwrap();
    assert!(!status.from_code);
    assert_eq!(status.remote.address(), Ipv4Addr::new(192, 168, 1, 42));
    assert_eq!(launcher.first_commands()[0], "IPXNET CONNECT 192.168.1.42 19900");
}

#[test]
fn join_by_code() {
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), unreachable_gateway());

    let status = orch.join(&game(), "TORCH-00MBP", DEFAULT_PORT).unwrap();
    assert!(status.from_code);
    assert_eq!(launcher.first_commands()[0], "IPXNET CONNECT 203.0.113.5 19900");
    assert_eq!(status.to_string(), "Connecting to 203.0.113.5:19900 (from discovery code)");
}

#[test]
fn join_port_rules() {
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), unreachable_gateway());

    // embedded non-default port wins over the flag
    let status = orch.join(&game(), "ATLAS-00001-P0FFK", 21000).unwrap();
    assert_eq!(status.remote.port(), 20000);

    // code without suffix follows the flag
    let status = orch.join(&game(), "TORCH-00MBP", 21000).unwrap();
    assert_eq!(status.remote.port(), 21000);

    let status = orch.join(&game(), "10.0.0.7", 21000).unwrap();
    assert_eq!(status.remote.port(), 21000);
    assert_eq!(launcher.launches()[2].commands().next().unwrap(), "IPXNET CONNECT 10.0.0.7 21000");
}

#[test]
fn join_with_bad_host_launches_nothing() {
    let launcher = RecordingLauncher::default();
    let orch = orchestrator(launcher.clone(), unreachable_gateway());

    let err = orch.join(&game(), "not-a-code!!", DEFAULT_PORT).unwrap_err();
    assert!(matches!(err, IpxError::InvalidHost(_)));
    assert!(launcher.launches().is_empty());
}
