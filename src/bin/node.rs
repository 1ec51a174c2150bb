//! HopNet 노드 - 로컬 UDP 매체 위 단일 노드
//!
//! 같은 호스트에서 태그별로 하나씩 띄우면 4노드 세션이 됨.
//! 노드 태그 n의 수신 포트는 `base_port + n`
//!
//! 사용법:
//!   cargo run --release --bin hopnet-node -- --tag C [OPTIONS]
//!
//! 예시:
//!   # 입력 디렉터리의 to_A.bin / to_B.bin / to_D.bin 전송
//!   cargo run --release --bin hopnet-node -- --tag C --input-dir ./out --output-dir ./in

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hopnet::air::{UdpAirRx, UdpAirTx};
use hopnet::{Config, FileStore, FrameCounting, IdentityCodec, PeerTag, SessionController};

/// 노드 실행 설정
struct NodeConfig {
    input_dir: Option<PathBuf>,
    output_dir: PathBuf,
    base_port: u16,
    config: Config,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            input_dir: None,
            output_dir: PathBuf::from("."),
            base_port: 47_000,
            config: Config::default(),
        }
    }
}

fn parse_tag(value: &str) -> PeerTag {
    PeerTag::ALL
        .into_iter()
        .find(|tag| tag.to_string().eq_ignore_ascii_case(value))
        .expect("태그는 A, B, C, D 중 하나")
}

fn parse_args() -> NodeConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut node = NodeConfig::default();
    let mut tag = PeerTag::C;
    let mut counting = FrameCounting::Legacy;
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--tag" | "-t" => {
                if i + 1 < args.len() {
                    tag = parse_tag(&args[i + 1]);
                    i += 1;
                }
            }
            "--input-dir" | "-i" => {
                if i + 1 < args.len() {
                    node.input_dir = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--output-dir" | "-o" => {
                if i + 1 < args.len() {
                    node.output_dir = PathBuf::from(&args[i + 1]);
                    i += 1;
                }
            }
            "--base-port" => {
                if i + 1 < args.len() {
                    node.base_port = args[i + 1].parse().expect("유효한 포트 필요");
                    i += 1;
                }
            }
            "--exact-count" => counting = FrameCounting::Exact,
            "--budget" | "--rescan" | "--gap-ms" => {
                if i + 1 < args.len() {
                    overrides.push((args[i].clone(), args[i + 1].clone()));
                    i += 1;
                }
            }
            "--run-to-budget" => overrides.push((args[i].clone(), String::new())),
            "--help" | "-h" => {
                println!(
                    r#"HopNet Node - 주파수 호핑 다자간 전송 노드

사용법:
  cargo run --release --bin hopnet-node -- [OPTIONS]

옵션:
  -t, --tag <A|B|C|D>     노드 태그 (기본: C)
  -i, --input-dir <DIR>   송신 스트림 디렉터리 (to_<태그>.bin)
  -o, --output-dir <DIR>  수신 스트림 저장 디렉터리 (기본: .)
  --base-port <PORT>      UDP 매체 기준 포트 (기본: 47000)
  --budget <SECS>         세션 시간 예산 (기본: 100)
  --rescan <N>            N회 반복마다 수신 주파수 이동 (기본: 200)
  --gap-ms <MS>           프레임 간 간격 (기본: 10)
  --exact-count           정확한 프레임 수 계산 (기존 노드와 비호환)
  --run-to-budget         전부 받아도 예산 끝까지 송신 계속
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    // 태그별 주파수 배치 위에 옵션 적용
    let mut config = Config::for_node(tag);
    config.frame_counting = counting;
    for (flag, value) in overrides {
        match flag.as_str() {
            "--budget" => {
                config.session_budget =
                    Duration::from_secs(value.parse().expect("유효한 숫자 필요"))
            }
            "--rescan" => config.rescan_interval = value.parse().expect("유효한 숫자 필요"),
            "--gap-ms" => {
                config.frame_gap = Duration::from_millis(value.parse().expect("유효한 숫자 필요"))
            }
            "--run-to-budget" => config.stop_when_all_received = false,
            _ => {}
        }
    }
    node.config = config;
    node
}

/// 입력 디렉터리에서 피어별 송신 스트림 읽기 (없는 파일은 건너뜀)
fn load_outbound(node: &NodeConfig) -> std::io::Result<BTreeMap<PeerTag, Bytes>> {
    let mut outbound = BTreeMap::new();
    let Some(dir) = &node.input_dir else {
        return Ok(outbound);
    };

    for peer in &node.config.peers {
        let path = dir.join(format!("to_{}.bin", peer.tag));
        match std::fs::read(&path) {
            Ok(data) => {
                info!("Loaded {:?}: {} bytes", path, data.len());
                outbound.insert(peer.tag, Bytes::from(data));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No stream for peer {} ({:?})", peer.tag, path);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(outbound)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let node = parse_args();
    let config = node.config.clone();
    let first_channel = config.peers[0].channel;

    info!("HopNet node {} starting...", config.local_tag);
    info!("TX channel: {:#04x}", config.tx_channel);
    info!("Frame size: {} bytes ({:?})", config.frame_size, config.frame_counting);
    info!("Session budget: {:?}", config.session_budget);

    let outbound = load_outbound(&node)?;
    let tx = UdpAirTx::bind(node.base_port, config.local_tag, config.tx_channel)?;
    let rx = UdpAirRx::bind(node.base_port, config.local_tag, first_channel)?;
    info!("Listening on {}", rx.local_addr()?);

    let store = FileStore::new(&node.output_dir)?;
    let mut session = SessionController::new(config, tx, rx, IdentityCodec, store)?;
    session.queue_outbound(&outbound)?;

    let report = session.run().await?;
    for peer in &report.peers {
        info!(
            "Peer {}: {:?}, {}/{} slots, {} bytes stored{}",
            peer.tag,
            peer.outcome,
            peer.slots_filled,
            peer.total_count,
            peer.stored_len,
            peer.store_error
                .as_deref()
                .map(|e| format!(" (store failed: {})", e))
                .unwrap_or_default()
        );
    }
    info!("{}", report.summary());

    Ok(())
}
