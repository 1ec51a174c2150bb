//! HopNet 시뮬레이터 - 프로세스 내 매체 위 4노드 세션
//!
//! 노드마다 다른 세 노드로 보낼 무작위 스트림을 만들고,
//! 세션이 끝나면 받은 스트림을 원본과 비교함
//!
//! 사용법:
//!   cargo run --release --bin hopnet-sim -- [OPTIONS]
//!
//! 예시:
//!   # 10% 손실, 1% 비트 오류
//!   cargo run --release --bin hopnet-sim -- --loss 0.1 --corruption 0.01

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use hopnet::{
    Config, Ether, FrameCounting, IdentityCodec, MemoryStore, PeerOutcome, PeerTag,
    SessionController, MAX_FRAMES_PER_STREAM, MAX_PAYLOAD,
};

/// 시뮬레이션 설정
struct SimConfig {
    stream_size: usize,
    loss: f64,
    corruption: f64,
    budget: Duration,
    counting: FrameCounting,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            stream_size: 600,
            loss: 0.05,
            corruption: 0.01,
            budget: Duration::from_secs(5),
            counting: FrameCounting::Legacy,
        }
    }
}

fn parse_args() -> SimConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = SimConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--size" | "-s" => {
                if i + 1 < args.len() {
                    config.stream_size = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--loss" => {
                if i + 1 < args.len() {
                    config.loss = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--corruption" => {
                if i + 1 < args.len() {
                    config.corruption = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--budget" => {
                if i + 1 < args.len() {
                    config.budget =
                        Duration::from_secs(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--exact-count" => config.counting = FrameCounting::Exact,
            "--help" | "-h" => {
                println!(
                    r#"HopNet Simulator - 4노드 프로세스 내 시뮬레이션

사용법:
  cargo run --release --bin hopnet-sim -- [OPTIONS]

옵션:
  -s, --size <BYTES>      노드 쌍별 스트림 최대 크기 (기본: 600)
  --loss <P>              프레임 손실 확률 (기본: 0.05)
  --corruption <P>        단일 비트 오류 확률 (기본: 0.01)
  --budget <SECS>         세션 시간 예산 (기본: 5)
  --exact-count           정확한 프레임 수 계산
  -h, --help              이 도움말 출력
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let sim = parse_args();

    // 64프레임 한도 안으로 제한 (Legacy는 빈 꼬리 프레임 여유 1개)
    let max_stream = (MAX_FRAMES_PER_STREAM - 1) * MAX_PAYLOAD;
    let stream_size = sim.stream_size.clamp(1, max_stream);

    info!("HopNet simulator starting...");
    info!("Stream size: up to {} bytes per pair", stream_size);
    info!(
        "Loss: {:.1}%, corruption: {:.1}%",
        sim.loss * 100.0,
        sim.corruption * 100.0
    );

    let mut rng = rand::thread_rng();
    let mut originals: BTreeMap<(PeerTag, PeerTag), Bytes> = BTreeMap::new();
    for from in PeerTag::ALL {
        for to in PeerTag::ALL.into_iter().filter(|&t| t != from) {
            let len = rng.gen_range(1..=stream_size);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            originals.insert((from, to), Bytes::from(data));
        }
    }

    let ether = Ether::with_impairments(sim.loss, sim.corruption);
    let mut nodes = Vec::new();

    for tag in PeerTag::ALL {
        let layout = Config::for_node(tag);
        let config = Config {
            local_tag: layout.local_tag,
            tx_channel: layout.tx_channel,
            peers: layout.peers,
            frame_counting: sim.counting,
            session_budget: sim.budget,
            stop_when_all_received: false,
            ..Config::quick()
        };

        let (tx, rx) = ether.attach(config.tx_channel, config.peers[0].channel);
        let outbound: BTreeMap<PeerTag, Bytes> = config
            .peers
            .iter()
            .filter_map(|p| originals.get(&(tag, p.tag)).map(|d| (p.tag, d.clone())))
            .collect();

        let store = Arc::new(MemoryStore::new());
        let mut session = SessionController::new(config, tx, rx, IdentityCodec, store.clone())?;
        session.queue_outbound(&outbound)?;

        nodes.push((tag, store, tokio::spawn(session.run())));
    }

    let mut intact = 0usize;
    let mut total = 0usize;
    for (tag, store, handle) in nodes {
        let report = handle.await??;
        println!("{}", report.summary());

        for peer in &report.peers {
            total += 1;
            let expected = &originals[&(peer.tag, tag)];
            let received = store.get(peer.tag);
            match (peer.outcome, received) {
                (PeerOutcome::Completed, Some(data)) if &data == expected => intact += 1,
                (outcome, data) => error!(
                    "{} ← {}: {:?}, {} / {} bytes",
                    tag,
                    peer.tag,
                    outcome,
                    data.map_or(0, |d| d.len()),
                    expected.len()
                ),
            }
        }
    }

    println!("Intact streams: {}/{}", intact, total);
    Ok(())
}
