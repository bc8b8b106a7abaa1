#![cfg(feature = "std-tokio")]

use std::sync::Arc;

use matter_credentials_issuer::{
    issuer::{
        csr::encode_csr_elements,
        keypair_store::{store_keypair, IssuerRole},
    },
    ChannelSink, ErrorKind, IcacPolicy, IssuanceOutcome, IssuanceRequest, IssuerConfig, KeyPair,
    MemoryStorage, OperationalCredentialsIssuer,
};
use tokio::sync::{mpsc, oneshot};

fn issuer() -> Arc<OperationalCredentialsIssuer> {
    let storage = Arc::new(MemoryStorage::new());
    store_keypair(storage.as_ref(), IssuerRole::RootIssuer, &KeyPair::new()).unwrap();
    store_keypair(storage.as_ref(), IssuerRole::IntermediateIssuer, &KeyPair::new()).unwrap();
    let config = IssuerConfig {
        icac_policy: IcacPolicy::GenerateFromRoot,
        ..Default::default()
    };
    Arc::new(OperationalCredentialsIssuer::new(storage, config).unwrap())
}

fn envelope() -> Vec<u8> {
    let csr = KeyPair::new().certificate_signing_request().unwrap();
    encode_csr_elements(&csr, None)
}

#[tokio::test]
async fn issue_async_returns_outcome() {
    let issuer = issuer();
    let envelope = envelope();

    let result = issuer
        .clone()
        .issue_async(IssuanceRequest::new(&envelope).with_fabric_id(9))
        .await
        .unwrap();
    assert_eq!(result.fabric_id, 9);
    assert_eq!(result.node_id, 1);

    let err = issuer
        .issue_async(IssuanceRequest::new(&envelope[..4]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TruncatedInput);
}

#[tokio::test]
async fn oneshot_sink() {
    let issuer = issuer();
    let envelope = envelope();
    let (sender, receiver) = oneshot::channel::<IssuanceOutcome>();

    issuer.issue(IssuanceRequest::new(&envelope), sender);
    let result = receiver.await.unwrap().unwrap();
    assert_eq!(result.node_id, 1);
}

#[tokio::test]
async fn dropped_receiver_does_not_fail_issuance() {
    let issuer = issuer();
    let envelope = envelope();
    let (sender, receiver) = oneshot::channel::<IssuanceOutcome>();
    drop(receiver);

    issuer.issue(IssuanceRequest::new(&envelope), sender);
    assert!(issuer.root_issuer_id().is_some());
}

#[tokio::test]
async fn channel_sink_tags_completions() {
    let issuer = issuer();
    let envelope = envelope();
    let (sender, mut receiver) = mpsc::unbounded_channel();

    // Completions are posted from blocking threads to this runtime's loop
    let mut tasks = Vec::new();
    for request_id in 0..3u64 {
        let issuer = Arc::clone(&issuer);
        let sink = ChannelSink::new(request_id, sender.clone());
        let envelope = if request_id == 1 {
            vec![0x15]
        } else {
            envelope.clone()
        };
        tasks.push(tokio::task::spawn_blocking(move || {
            issuer.issue(IssuanceRequest::new(&envelope), sink)
        }));
    }
    drop(sender);
    for task in tasks {
        task.await.unwrap();
    }

    let mut completions = Vec::new();
    while let Some(completion) = receiver.recv().await {
        completions.push(completion);
    }
    completions.sort_by_key(|c| c.request_id);

    assert_eq!(completions.len(), 3);
    assert!(completions[0].outcome.is_ok());
    assert_eq!(
        completions[1].outcome.as_ref().unwrap_err().kind(),
        ErrorKind::TruncatedInput
    );
    assert!(completions[2].outcome.is_ok());
}
