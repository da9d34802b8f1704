//! End-to-end tests against a real Docker daemon.
//!
//! Requires Docker. Tests are `#[ignore]` and run explicitly with
//! `--ignored`.

use eosic_config::EngineConfig;
use eosic_provider::demux::demux_frames;
use eosic_provider::{create_provider, ContainerProvider, CreateContainerConfig, ExecConfig};

async fn provider() -> Box<dyn ContainerProvider> {
    create_provider(&EngineConfig::default())
        .await
        .expect("Docker must be reachable for e2e tests")
}

#[tokio::test]
#[ignore]
async fn test_ping_and_list_images() {
    let provider = provider().await;
    provider.ping().await.unwrap();

    let images = provider.list_images().await.unwrap();
    assert!(images.iter().all(|i| !i.id.is_empty()));
}

#[tokio::test]
#[ignore]
async fn test_exec_output_is_framed() {
    let provider = provider().await;
    let images = provider.list_images().await.unwrap();
    let Some(image) = images.iter().find(|i| i.repo_tags.iter().any(|t| t.starts_with("alpine"))) else {
        eprintln!("No alpine image available, skipping");
        return;
    };

    let config = CreateContainerConfig {
        image: image.repo_tags[0].clone(),
        cmd: Some(vec!["sleep".into(), "30".into()]),
        ..Default::default()
    };
    let id = provider.create(&config).await.unwrap();
    provider.start(&id).await.unwrap();

    let exec = ExecConfig {
        cmd: vec!["sh".into(), "-c".into(), "echo out; echo err >&2".into()],
        ..Default::default()
    };
    let session = provider.exec(&id, &exec).await.unwrap();
    let mut output = String::new();
    demux_frames(session.output, &mut output).await.unwrap();
    let code = provider.exec_exit_code(&session.id).await.unwrap();

    provider.stop(&id, Some(1)).await.unwrap();
    provider.remove(&id, true).await.unwrap();

    assert!(output.contains("out\n"));
    assert!(output.contains("err\n"));
    assert_eq!(code, Some(0));
}
