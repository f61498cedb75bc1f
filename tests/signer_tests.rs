//! End-to-end signing through the facade for both vendors

mod common;

use common::{test_address, MockBroker, MockConnector, MockLedger, MAIL_TYPED_DATA};
use hw_wallet_bridge::hardware::eip712::TypedData;
use hw_wallet_bridge::hardware::hashing::personal_message_hash;
use hw_wallet_bridge::hardware::ledger::LedgerProvider;
use hw_wallet_bridge::hardware::signature::{recover_address, split_signature, SECP256K1_HALF_N};
use hw_wallet_bridge::hardware::transaction::{LegacyTransaction, Transaction};
use hw_wallet_bridge::hardware::trezor::{ConnectBroker, TrezorProvider};
use hw_wallet_bridge::{ConnectionState, HardwareConfig, HardwareErrorKind, HardwareSigner, PathStyle, Vendor};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn ledger_signer(ledger: &MockLedger) -> HardwareSigner {
    let provider = LedgerProvider::new(Arc::new(MockConnector::new(ledger.clone())));
    HardwareSigner::new(Box::new(provider), HardwareConfig::default())
}

fn trezor_signer(broker: &MockBroker) -> HardwareSigner {
    let config = HardwareConfig {
        vendor: Vendor::Trezor,
        ..Default::default()
    };
    let broker: Arc<dyn ConnectBroker> = Arc::new(broker.clone());
    HardwareSigner::from_config(config, Some(broker)).unwrap()
}

fn assert_low_s(signature: &str) {
    let s = split_signature(signature).unwrap();
    assert!(&s.s()[2..] <= hex::encode(SECP256K1_HALF_N).as_str(), "s not canonical: {}", s.s());
}

#[tokio::test]
async fn test_ledger_high_s_message_is_canonicalized() {
    let ledger = MockLedger::new();
    ledger.emit_high_s();
    let mut signer = ledger_signer(&ledger);
    let path = signer.path_for_index(0).unwrap();

    let signature = signer.sign_message(&path, b"canonical please").await.unwrap();
    assert_eq!(signature.len(), 132);
    assert_low_s(&signature);
    assert_eq!(
        recover_address(&personal_message_hash(b"canonical please"), &signature).unwrap(),
        test_address()
    );
}

#[tokio::test]
async fn test_ledger_transaction_signature() {
    let ledger = MockLedger::new();
    let mut signer = ledger_signer(&ledger);
    let path = signer.path_for_index(1).unwrap();
    let tx = Transaction::Legacy(LegacyTransaction {
        chain_id: 1,
        nonce: 9,
        gas_price: 20_000_000_000,
        gas_limit: 21_000,
        to: Some("0x3535353535353535353535353535353535353535".parse().unwrap()),
        value: 1_000_000_000_000_000_000,
        data: vec![],
    });

    let signature = signer.sign_transaction(&path, &tx).await.unwrap();
    let v = split_signature(&signature).unwrap().v();
    assert!(v == 37 || v == 38);
}

#[tokio::test]
async fn test_trezor_typed_data_signature() {
    let broker = MockBroker::new();
    broker.emit_high_s();
    let mut signer = trezor_signer(&broker);
    let path = signer.path_for_index(0).unwrap();
    let typed = TypedData::from_json(MAIL_TYPED_DATA).unwrap();

    let signature = signer.sign_typed_data(&path, &typed).await.unwrap();
    assert_low_s(&signature);
    assert_eq!(
        recover_address(&typed.signing_hash().unwrap(), &signature).unwrap(),
        test_address()
    );
}

#[tokio::test]
async fn test_malformed_typed_data_never_reaches_device() {
    let broker = MockBroker::new();
    let mut signer = trezor_signer(&broker);
    let path = signer.path_for_index(0).unwrap();
    let mut typed = TypedData::from_json(MAIL_TYPED_DATA).unwrap();
    typed.primary_type = "Missing".to_string();

    assert!(signer.sign_typed_data(&path, &typed).await.is_err());
    assert!(!broker.methods().contains(&"ethereumSignTypedData".to_string()));
}

#[tokio::test]
async fn test_discovery_returns_device_addresses() {
    let broker = MockBroker::new();
    let mut signer = trezor_signer(&broker);
    let accounts = signer.default_accounts().await.unwrap();
    assert_eq!(accounts.len(), 5);
    assert_eq!(accounts[4].path, "m/44'/60'/0'/0/4");
    assert!(accounts.iter().all(|a| a.address == test_address()));
}

#[tokio::test]
async fn test_alternate_discovery_paths() {
    let broker = MockBroker::new();
    let config = HardwareConfig {
        vendor: Vendor::Trezor,
        path_style: PathStyle::Alternate,
        ..Default::default()
    };
    let mut signer = HardwareSigner::new(Box::new(TrezorProvider::new(Arc::new(broker.clone()))), config);
    let accounts = signer.discover_accounts(3, 2).await.unwrap();
    let paths: Vec<_> = accounts.iter().map(|a| a.path.as_str()).collect();
    assert_eq!(paths, vec!["m/44'/60'/3'/0/0", "m/44'/60'/4'/0/0"]);
}

#[tokio::test]
async fn test_rejection_is_classified_and_connection_kept() {
    let broker = MockBroker::new();
    broker.fail("ethereumSignMessage", "Failure_ActionCancelled", "Cancelled");
    let mut signer = trezor_signer(&broker);
    let path = signer.path_for_index(0).unwrap();

    let err = signer.sign_message(&path, b"nope").await.unwrap_err();
    assert_eq!(err.kind(), HardwareErrorKind::UserRejected);
    assert!(err.is_retryable());
    assert_eq!(signer.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_verify_address_displays_on_device() {
    let broker = MockBroker::new();
    let mut signer = trezor_signer(&broker);
    let path = signer.path_for_index(0).unwrap();

    let verified = signer.verify_address(&path).await.unwrap();
    assert!(verified.verified);
    assert_eq!(verified.address, test_address());
    let (_, params) = broker.calls().pop().unwrap();
    assert_eq!(params["showOnTrezor"], true);
}

#[tokio::test]
async fn test_state_listener_through_facade() {
    let broker = MockBroker::new();
    let mut signer = trezor_signer(&broker);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = signer.on_state_change(move |state, _| sink.lock().push(state));

    signer.connect().await.unwrap();
    signer.disconnect().await;
    assert_eq!(
        *seen.lock(),
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected
        ]
    );
}

#[test]
fn test_from_config_without_broker_is_unsupported() {
    let config = HardwareConfig {
        vendor: Vendor::Trezor,
        ..Default::default()
    };
    let err = HardwareSigner::from_config(config, None).unwrap_err();
    assert_eq!(err.kind(), HardwareErrorKind::UnsupportedOperation);
}
