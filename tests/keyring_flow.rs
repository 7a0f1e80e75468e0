mod common;

use atlink::bridge::Command;
use atlink::config::StateFile;
use atlink::{Error, EthAddress, HdPath, HostKeyring, KeyringState, UnlockOutcome};
use common::{
    FIRST_ADDRESS, MockDevice, ScriptedHistory, address_at, fixture_tx, keyring_with,
};
use std::sync::Arc;

fn setup(device: MockDevice, used_below: u32) -> (atlink::BridgeKeyring, Arc<MockDevice>, Arc<ScriptedHistory>) {
    let device = Arc::new(device);
    let history = Arc::new(ScriptedHistory::used_below(used_below));
    (keyring_with(device.clone(), history.clone()), device, history)
}

#[tokio::test]
async fn test_add_accounts_matches_private_derivation() {
    let (keyring, device, _) = setup(MockDevice::default(), 0);

    let accounts = keyring.add_accounts(3).await.unwrap();
    assert_eq!(accounts.len(), 3);
    assert_eq!(accounts[0].to_checksum(), FIRST_ADDRESS);
    assert_eq!(accounts, vec![address_at(0), address_at(1), address_at(2)]);

    let paths: Vec<String> = device
        .requests(Command::AddAccount)
        .iter()
        .map(|request| request.parameters["path"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(paths, vec!["m/44'/60'/0'", "m/44'/60'/1'", "m/44'/60'/2'"]);

    assert_eq!(device.opens(), device.closes());
}

#[tokio::test]
async fn test_unlock_reports_address_then_noop() {
    let (keyring, device, _) = setup(MockDevice::default(), 0);
    assert!(!keyring.is_unlocked().await);

    let outcome = keyring.unlock(None).await.unwrap();
    assert_eq!(outcome, UnlockOutcome::Unlocked(address_at(0)));
    assert_eq!(keyring.unlock(None).await.unwrap(), UnlockOutcome::AlreadyUnlocked);

    let explicit = keyring.unlock(Some(&HdPath::for_account(4).unwrap())).await.unwrap();
    assert_eq!(explicit, UnlockOutcome::Unlocked(address_at(4)));
    assert_eq!(device.requests(Command::GetExtendedPublicKey).len(), 2);
}

#[tokio::test]
async fn test_sign_transaction_verifies_signer() {
    let (keyring, device, _) = setup(MockDevice::default(), 0);
    keyring.add_accounts(1).await.unwrap();

    let signed = keyring
        .sign_transaction(&address_at(0).to_checksum().to_lowercase(), &fixture_tx())
        .await
        .unwrap();
    assert_eq!(signed.recover_signer().unwrap(), address_at(0));
    assert!(signed.v == 37 || signed.v == 38);
    assert!(!signed.raw().is_empty());

    let sent = &device.requests(Command::SignTransaction)[0];
    assert_eq!(sent.parameters["address"], FIRST_ADDRESS);
    assert_eq!(sent.parameters["transaction"]["nonce"], "0x09");
    assert_eq!(sent.parameters["transaction"]["chainId"], "0x01");
    assert_eq!(
        sent.parameters["transaction"]["to"],
        "0x3535353535353535353535353535353535353535"
    );
}

#[tokio::test]
async fn test_sign_transaction_rejects_foreign_signature() {
    let device = MockDevice {
        sign_with_wrong_key: true,
        ..MockDevice::default()
    };
    let (keyring, _, _) = setup(device, 0);
    keyring.add_accounts(1).await.unwrap();

    let err = keyring
        .sign_transaction(FIRST_ADDRESS, &fixture_tx())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::SignatureVerification));
    assert_eq!(err.to_string(), "The transaction signature is not valid");
}

#[tokio::test]
async fn test_unknown_signer_surfaces_device_status() {
    let (keyring, _, _) = setup(MockDevice::default(), 0);
    let stranger = "0x0000000000000000000000000000000000000001";
    let err = keyring.sign_transaction(stranger, &fixture_tx()).await.unwrap_err();
    assert_eq!(err.to_string(), "Not Found");
}

#[tokio::test]
async fn test_add_accounts_keeps_partial_batch_on_device_failure() {
    let device = MockDevice {
        fail_add_at: Some(1),
        ..MockDevice::default()
    };
    let (keyring, device, _) = setup(device, 0);

    let accounts = keyring.add_accounts(3).await.unwrap();
    assert_eq!(accounts, vec![address_at(0)]);
    assert_eq!(device.requests(Command::AddAccount).len(), 2);
}

#[tokio::test]
async fn test_add_accounts_skips_already_tracked() {
    let (keyring, device, _) = setup(MockDevice::default(), 0);
    keyring.add_accounts(2).await.unwrap();
    let accounts = keyring.add_accounts(3).await.unwrap();
    assert_eq!(accounts, vec![address_at(0), address_at(1), address_at(2)]);
    assert_eq!(device.requests(Command::AddAccount).len(), 3);
}

#[tokio::test]
async fn test_remove_survives_device_failure() {
    let device = MockDevice {
        fail_remove: true,
        ..MockDevice::default()
    };
    let (keyring, device, _) = setup(device, 0);
    keyring.add_accounts(2).await.unwrap();

    keyring.remove_account(FIRST_ADDRESS).await.unwrap();
    assert_eq!(keyring.get_accounts().await.unwrap(), vec![address_at(1)]);
    assert_eq!(device.requests(Command::RemoveAccount).len(), 1);

    let err = keyring.remove_account(FIRST_ADDRESS).await.unwrap_err();
    assert_eq!(
        err.to_string(),
        format!("Address {FIRST_ADDRESS} not found in this keyring")
    );
    assert_eq!(keyring.get_accounts().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_forget_device_forces_fresh_key() {
    let (keyring, device, _) = setup(MockDevice::default(), 0);
    keyring.add_accounts(1).await.unwrap();
    let fetched = device.requests(Command::GetExtendedPublicKey).len();

    keyring.forget_device().await;
    assert!(keyring.get_accounts().await.unwrap().is_empty());
    assert!(!keyring.is_unlocked().await);

    keyring.add_accounts(1).await.unwrap();
    assert_eq!(device.requests(Command::GetExtendedPublicKey).len(), fetched + 1);
}

#[tokio::test]
async fn test_first_page_stops_after_unused_account() {
    let (keyring, _, history) = setup(MockDevice::default(), 2);

    let page = keyring.get_first_page().await.unwrap();
    let addresses: Vec<EthAddress> = page.iter().map(|entry| entry.address).collect();
    assert_eq!(addresses, vec![address_at(0), address_at(1), address_at(2)]);
    assert_eq!(history.queried().len(), 3);
}

#[tokio::test]
async fn test_pages_stay_under_index_ceiling() {
    let (keyring, _, _) = setup(MockDevice::default(), 10);

    let first = keyring.get_first_page().await.unwrap();
    let second = keyring.get_next_page().await.unwrap();
    let third = keyring.get_next_page().await.unwrap();
    assert_eq!(first.len(), 5);
    assert_eq!(second.iter().map(|e| e.index).collect::<Vec<_>>(), vec![5, 6, 7, 8, 9]);
    assert!(third.is_empty());

    let back = keyring.get_previous_page().await.unwrap();
    assert_eq!(back[0].address, address_at(5));
    assert_eq!(keyring.serialize().await.unwrap().page, 2);

    // first page resets regardless of where paging stood
    let again = keyring.get_first_page().await.unwrap();
    assert_eq!(again[0].index, 0);
}

#[tokio::test]
async fn test_state_survives_serialize_deserialize() {
    let (keyring, _, _) = setup(MockDevice::default(), 0);
    keyring.set_account_to_unlock(1).await.unwrap();
    keyring.add_accounts(2).await.unwrap();
    let state = keyring.serialize().await.unwrap();
    assert_eq!(state.accounts, vec![address_at(1), address_at(2)]);

    let json = serde_json::to_string(&state).unwrap();
    let restored: KeyringState = serde_json::from_str(&json).unwrap();

    let (fresh, device, _) = setup(MockDevice::default(), 0);
    fresh.deserialize(restored).await.unwrap();
    assert_eq!(fresh.get_accounts().await.unwrap(), state.accounts);
    assert_eq!(fresh.serialize().await.unwrap(), state);

    fresh.set_account_to_unlock(0).await.unwrap();
    let accounts = fresh.add_accounts(3).await.unwrap();
    assert_eq!(accounts, vec![address_at(1), address_at(2), address_at(0)]);
    assert_eq!(device.requests(Command::AddAccount).len(), 1);
}

#[tokio::test]
async fn test_partial_batch_is_saved_when_bridge_drops() {
    // xpub for account 0 and its AddAccount go through, then the bridge disappears
    let device = MockDevice {
        refuse_after: Some(2),
        ..MockDevice::default()
    };
    let (keyring, _, _) = setup(device, 0);

    let err = keyring.add_accounts(3).await.unwrap_err();
    assert!(matches!(err, Error::Connect));
    assert_eq!(keyring.get_accounts().await.unwrap(), vec![address_at(0)]);

    let dir = tempfile::tempdir().unwrap();
    let state_file = StateFile(dir.path().join("nested").join("state.json"));
    state_file.save(&keyring.serialize().await.unwrap()).unwrap();

    let (fresh, _, _) = setup(MockDevice::default(), 0);
    fresh.deserialize(state_file.load().unwrap().unwrap()).await.unwrap();
    assert_eq!(fresh.get_accounts().await.unwrap(), vec![address_at(0)]);
}

#[tokio::test]
async fn test_add_from_out_of_range_index_is_rejected() {
    let (keyring, device, _) = setup(MockDevice::default(), 0);
    let err = keyring.set_account_to_unlock(0x8000_0000).await.unwrap_err();
    assert!(matches!(err, Error::MalformedPath(_)));

    keyring.set_account_to_unlock(u32::MAX >> 1).await.unwrap();
    let err = keyring.add_accounts(2).await.unwrap_err();
    assert!(matches!(err, Error::MalformedPath(_)));
    assert_eq!(device.opens(), 0);
}
