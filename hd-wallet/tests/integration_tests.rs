//! Integration tests for bth-hd-wallet
//!
//! These tests verify end-to-end wallet behaviour including:
//! - Wallet lifecycle (create, persist, open)
//! - Password changes with m-of-n root sets
//! - Watching-only export
//! - Auth and settlement leaves
//! - Private key resolution
//! - Tolerance of damaged wallet files

use bth_crypto_encryption::KdfSettings;
use bth_crypto_hd::{
    chained_public_key, public_key_from_private, Address, AddressType, CoinType, NetworkType,
    Seed,
};
use bth_hd_wallet::{
    combined_password, Branch, Error, LeafSettings, LeafState, PasswordData, ResolverFeed,
    WatchList, Wallet, WalletSettings, AUTH_POOL_SIZE,
};
use bth_util_kvstore::{KeyValueStore, LmdbStoreSettings, MemoryStore};
use std::sync::Arc;
use tempfile::TempDir;

const TEST_PASSWORD: &[u8] = b"secure-test-password-123!";
const TEST_ENTROPY: [u8; 32] = [0x3C; 32];

fn settings() -> WalletSettings {
    WalletSettings {
        kdf: KdfSettings::fast(),
        leaf: LeafSettings {
            external_pool_size: 5,
            internal_pool_size: 3,
            ..Default::default()
        },
        store: LmdbStoreSettings::default(),
    }
}

fn seed() -> Seed {
    Seed::from_entropy(TEST_ENTROPY.to_vec(), NetworkType::TestNet)
}

fn encrypted_wallet() -> Wallet {
    Wallet::create(
        "Primary",
        "integration",
        &seed(),
        &[PasswordData::password(TEST_PASSWORD)],
        settings(),
    )
    .unwrap()
}

// ============================================================================
// Wallet Lifecycle Tests
// ============================================================================

mod wallet_lifecycle {
    use super::*;

    #[test]
    fn test_persist_and_open() {
        let temp_dir = TempDir::new().unwrap();

        // 1. Create wallet and hand out addresses
        let wallet = encrypted_wallet();
        let leaf = wallet.create_structure(TEST_PASSWORD).unwrap();
        let ext = leaf.new_external_address(None).unwrap();
        let int = leaf.new_internal_address(Some(AddressType::NestedP2wpkh)).unwrap();
        let legacy = leaf.create_address(Branch::External, Some(AddressType::P2pkh)).unwrap();

        // 2. Persist to disk
        let path = wallet.persist_to(temp_dir.path()).unwrap();
        assert!(path.exists());
        assert_eq!(
            path.file_name().unwrap().to_str().unwrap(),
            format!("bip44_{}_wallet.lmdb", wallet.wallet_id())
        );
        drop(wallet);

        // 3. Open and compare
        let opened = Wallet::open(&path, settings()).unwrap();
        assert!(opened.load_defects().is_empty());
        assert_eq!(opened.name(), "Primary");
        assert_eq!(opened.description(), "integration");
        assert_eq!(opened.network(), NetworkType::TestNet);
        assert_eq!(opened.key_rank(), (1, 1));

        let loaded = opened
            .get_group(CoinType::BitcoinTest.as_u32())
            .and_then(|g| g.get_leaf(0))
            .unwrap();
        assert_eq!(loaded.used_addresses(), leaf.used_addresses());
        assert_eq!(loaded.external_addresses(), vec![ext.clone(), legacy.clone()]);
        assert_eq!(loaded.internal_addresses(), vec![int]);
        assert_eq!(loaded.address_index(&legacy).as_deref(), Some("0/1"));
        assert_eq!(loaded.pooled_addresses(), leaf.pooled_addresses());

        // 4. Counters continue where they left off
        let next = loaded.new_external_address(None).unwrap();
        assert_eq!(loaded.address_index(&next).as_deref(), Some("0/2"));
    }

    #[test]
    fn test_same_seed_same_addresses() {
        let a = encrypted_wallet();
        let b = Wallet::create("Other", "", &seed(), &[], settings()).unwrap();
        assert_eq!(a.wallet_id(), b.wallet_id());

        let leaf_a = a.create_structure(TEST_PASSWORD).unwrap();
        let leaf_b = b.create_structure(b"").unwrap();
        for _ in 0..3 {
            assert_eq!(
                leaf_a.new_external_address(None).unwrap(),
                leaf_b.new_external_address(None).unwrap()
            );
        }
    }

    #[test]
    fn test_wrong_passphrase() {
        let wallet = encrypted_wallet();
        let err = wallet.unlock(b"not the password").unwrap_err();
        assert!(err.is_wrong_passphrase());
        assert!(matches!(
            wallet.create_structure(b"not the password"),
            Err(e) if e.is_wrong_passphrase()
        ));
        assert_eq!(wallet.unlock(TEST_PASSWORD).unwrap().id(), wallet.wallet_id());
    }

    #[test]
    fn test_encrypted_group_needs_unlocked_root() {
        let wallet = encrypted_wallet();
        let group = wallet.create_group(CoinType::BitcoinTest.as_u32());
        assert!(group.create_leaf(1, None).is_err());

        let root = wallet.unlock(TEST_PASSWORD).unwrap();
        let leaf = group.create_leaf(1, Some(&root)).unwrap();
        assert_eq!(leaf.path().to_string(), "m/44'/1'/1'");
        assert!(Arc::ptr_eq(&leaf, &group.create_leaf(1, None).unwrap()));
    }

    #[test]
    fn test_comments_persist() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = encrypted_wallet();
        let leaf = wallet.create_structure(TEST_PASSWORD).unwrap();
        let kept = leaf.new_external_address(None).unwrap();
        let removed = leaf.new_external_address(None).unwrap();
        let path = wallet.persist_to(temp_dir.path()).unwrap();

        wallet.set_address_comment(&kept, "savings").unwrap();
        wallet.set_address_comment(&removed, "temporary").unwrap();
        wallet.save().unwrap();
        wallet.set_address_comment(&removed, "").unwrap();
        wallet.save().unwrap();
        drop(wallet);

        let opened = Wallet::open(&path, settings()).unwrap();
        assert_eq!(opened.address_comment(&kept).as_deref(), Some("savings"));
        assert_eq!(opened.address_comment(&removed), None);
    }

    #[test]
    fn test_pool_activity_promotes_addresses() {
        let wallet = encrypted_wallet();
        let leaf = wallet.create_structure(TEST_PASSWORD).unwrap();
        let pooled: Vec<Address> = leaf
            .pooled_addresses()
            .into_iter()
            .filter(|a| leaf.is_external_address(a) && a.address_type() == AddressType::P2wpkh)
            .collect();
        let third = pooled
            .iter()
            .find(|a| leaf.address_index(a).as_deref() == Some("0/2"))
            .unwrap()
            .clone();

        assert!(wallet.on_address_activity(&third, true).unwrap());
        assert_eq!(leaf.external_addresses().len(), 3);
        assert!(!wallet.on_address_activity(&third, true).unwrap());
        assert_eq!(
            leaf.new_external_address(None).map(|a| leaf.address_index(&a)).unwrap().as_deref(),
            Some("0/3")
        );
    }

    #[test]
    fn test_register_addresses() {
        let wallet = encrypted_wallet();
        let leaf = wallet.create_structure(TEST_PASSWORD).unwrap();
        let used = leaf.new_external_address(None).unwrap();

        let watch_list = WatchList::new();
        let count = wallet.register_addresses(&watch_list).unwrap();
        assert_eq!(count, leaf.watched_addresses().len());
        assert!(watch_list.contains(&used));
        assert_eq!(watch_list.addresses(wallet.wallet_id()).len(), count);
    }
}

// ============================================================================
// Password Change Tests
// ============================================================================

mod change_password {
    use super::*;

    #[test]
    fn test_two_of_three() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = encrypted_wallet();
        let leaf = wallet.create_structure(TEST_PASSWORD).unwrap();
        let address = leaf.new_external_address(None).unwrap();
        let path = wallet.persist_to(temp_dir.path()).unwrap();

        let alpha = PasswordData::password(b"alpha");
        let beta = PasswordData::password(b"beta-beta");
        let gamma = PasswordData::device(b"gamma-secret", b"device-1");
        wallet
            .change_password(&[alpha.clone(), beta.clone(), gamma.clone()], (2, 3), TEST_PASSWORD)
            .unwrap();
        assert_eq!(wallet.key_rank(), (2, 3));
        assert!(wallet.pending_changes().is_empty());

        // Any two passwords unlock, one alone or the old one does not
        for pair in [[&alpha, &beta], [&alpha, &gamma], [&beta, &gamma]] {
            let combined = combined_password(&[pair[0].clone(), pair[1].clone()]);
            assert_eq!(wallet.unlock(&combined).unwrap().id(), wallet.wallet_id());
        }
        assert!(wallet.unlock(b"alpha").unwrap_err().is_wrong_passphrase());
        assert!(wallet.unlock(TEST_PASSWORD).unwrap_err().is_wrong_passphrase());

        // Leaves sign with the new root set
        let combined = combined_password(&[alpha.clone(), gamma.clone()]);
        let signer = leaf.signing_resolver(&combined).unwrap();
        let public_key = signer.resolve_public_key_or_script(address.unprefixed()).unwrap();
        let private_key = signer.resolve_private_key(&public_key).unwrap();
        assert_eq!(public_key_from_private(&private_key).unwrap().to_vec(), public_key);
        drop(wallet);

        // The new root set is on disk
        let opened = Wallet::open(&path, settings()).unwrap();
        assert_eq!(opened.key_rank(), (2, 3));
        assert_eq!(opened.encryption_keys(), vec![b"device-1".to_vec()]);
        assert!(opened.unlock(&combined).is_ok());
        assert!(opened.unlock(TEST_PASSWORD).is_err());

        // Shrinking the set removes the extra root records
        opened
            .change_password(&[PasswordData::password(b"single")], (1, 1), &combined)
            .unwrap();
        drop(opened);
        let reopened = Wallet::open(&path, settings()).unwrap();
        assert_eq!(reopened.key_rank(), (1, 1));
        assert!(reopened.unlock(b"single").is_ok());
        assert_eq!(
            reopened
                .get_group(CoinType::BitcoinTest.as_u32())
                .and_then(|g| g.get_leaf(0))
                .unwrap()
                .used_addresses(),
            vec![address]
        );
    }

    #[test]
    fn test_wrong_old_password() {
        let wallet = encrypted_wallet();
        let result = wallet.change_password(&[PasswordData::password(b"new")], (1, 1), b"wrong");
        assert!(matches!(result, Err(Error::WrongOldPassword)));
        assert!(wallet.unlock(TEST_PASSWORD).is_ok());
    }

    #[test]
    fn test_invalid_rank_keeps_old_root() {
        let wallet = encrypted_wallet();
        let passwords = [PasswordData::password(b"a"), PasswordData::password(b"b")];
        let result = wallet.change_password(&passwords, (3, 2), TEST_PASSWORD);
        assert!(matches!(result, Err(Error::InvalidKeyRank(3, 2))));
        assert_eq!(wallet.key_rank(), (1, 1));
        assert!(wallet.unlock(TEST_PASSWORD).is_ok());
    }

    #[test]
    fn test_remove_encryption() {
        let wallet = encrypted_wallet();
        wallet.change_password(&[], (1, 1), TEST_PASSWORD).unwrap();
        assert!(wallet.unlock(b"").is_ok());
        assert!(wallet.unlock(b"anything").is_ok());
    }
}

// ============================================================================
// Watching-Only Tests
// ============================================================================

mod watching_only {
    use super::*;

    #[test]
    fn test_export_matches_original() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = encrypted_wallet();
        let leaf = wallet.create_structure(TEST_PASSWORD).unwrap();
        let address = leaf.new_external_address(None).unwrap();
        leaf.new_internal_address(None).unwrap();
        wallet.set_address_comment(&address, "exported").unwrap();

        let wo = wallet.create_watching_only(TEST_PASSWORD).unwrap();
        assert!(wo.is_watching_only());
        assert!(!wallet.is_watching_only());
        assert_eq!(wo.wallet_id(), wallet.wallet_id());
        assert!(wo.file_name().starts_with("bip44wo_"));

        let wo_leaf = wo.leaves().remove(0);
        assert_eq!(wo_leaf.state(), LeafState::WatchingOnly);
        assert_eq!(wo_leaf.used_addresses(), leaf.used_addresses());
        assert_eq!(wo_leaf.pooled_addresses(), leaf.pooled_addresses());
        assert_eq!(
            wo_leaf.new_external_address(None).unwrap(),
            leaf.new_external_address(None).unwrap()
        );

        assert!(matches!(wo.unlock(TEST_PASSWORD), Err(Error::WatchingOnly)));
        assert!(matches!(wo_leaf.signing_resolver(TEST_PASSWORD), Err(Error::WatchingOnly)));
        assert!(matches!(
            wo.change_password(&[], (1, 1), TEST_PASSWORD),
            Err(Error::WatchingOnly)
        ));

        // Round trip through disk
        let path = wo.persist_to(temp_dir.path()).unwrap();
        let opened = Wallet::open(&path, settings()).unwrap();
        assert!(opened.is_watching_only());
        assert_eq!(opened.address_comment(&address).as_deref(), Some("exported"));
        assert_eq!(opened.leaves()[0].used_addresses(), wo_leaf.used_addresses());
    }

    #[test]
    fn test_new_leaf_needs_private_key() {
        let wallet = encrypted_wallet();
        wallet.create_structure(TEST_PASSWORD).unwrap();
        let wo = wallet.create_watching_only(TEST_PASSWORD).unwrap();

        let group = wo.get_group(CoinType::BitcoinTest.as_u32()).unwrap();
        assert!(matches!(group.create_leaf(5, None), Err(Error::WatchingOnly)));
    }
}

// ============================================================================
// Auth and Settlement Tests
// ============================================================================

mod special_leaves {
    use super::*;

    #[test]
    fn test_auth_leaf_waits_for_user_id() {
        let temp_dir = TempDir::new().unwrap();
        let wallet = encrypted_wallet();
        let root = wallet.unlock(TEST_PASSWORD).unwrap();
        let group = wallet.create_group(CoinType::BlockSettleAuth.as_u32());
        let leaf = group.create_leaf(0, Some(&root)).unwrap();

        assert!(matches!(leaf.new_external_address(None), Err(Error::UserIdRequired)));
        assert_eq!(leaf.pending_count(), 1);
        assert!(leaf.used_addresses().is_empty());
        assert!(leaf.pooled_addresses().is_empty());
        assert!(matches!(leaf.new_internal_address(None), Err(Error::NoInternalBranch)));

        wallet.set_user_id(Some("alice")).unwrap();
        assert_eq!(leaf.pending_count(), 0);
        let alice = leaf.used_addresses();
        assert_eq!(alice.len(), 1);
        assert!(leaf.pooled_addresses().len() >= AUTH_POOL_SIZE as usize);

        // A different user id gives different addresses
        wallet.set_user_id(Some("bob")).unwrap();
        assert_ne!(leaf.used_addresses(), alice);
        wallet.set_user_id(Some("alice")).unwrap();
        assert_eq!(leaf.used_addresses(), alice);

        // Signing derives the chained key
        let signer = leaf.signing_resolver(TEST_PASSWORD).unwrap();
        let public_key = signer.resolve_public_key_or_script(alice[0].unprefixed()).unwrap();
        let private_key = signer.resolve_private_key(&public_key).unwrap();
        assert_eq!(public_key_from_private(&private_key).unwrap().to_vec(), public_key);

        // The user id is not stored; the address comes back pending
        let path = wallet.persist_to(temp_dir.path()).unwrap();
        drop(wallet);
        let opened = Wallet::open(&path, settings()).unwrap();
        let loaded = opened
            .get_group(CoinType::BlockSettleAuth.as_u32())
            .and_then(|g| g.get_leaf(0))
            .unwrap();
        assert_eq!(loaded.pending_count(), 1);
        opened.set_user_id(Some("alice")).unwrap();
        assert_eq!(loaded.used_addresses(), alice);
    }

    #[test]
    fn test_settlement_leaf() {
        let wallet = encrypted_wallet();
        let root = wallet.unlock(TEST_PASSWORD).unwrap();
        let group = wallet.create_group(CoinType::BlockSettleSettlement.as_u32());
        let leaf = group.create_leaf(0, Some(&root)).unwrap();

        let own = *leaf.node().unwrap().public_key();
        let counterparty = public_key_from_private(&[0x07; 32]).unwrap();
        let settlement_id = [0x42; 32];

        let address = leaf.add_settlement_id(&settlement_id, &own, &counterparty).unwrap();
        assert_eq!(address.address_type(), AddressType::P2wsh);
        assert_eq!(leaf.index_for_settlement_id(&settlement_id), Some(0));
        assert_eq!(leaf.settlement_address(&settlement_id), Some(address.clone()));
        assert!(wallet.find_leaf_for_address(&address).is_some());

        assert!(matches!(
            leaf.add_settlement_id(&[0x01; 31], &own, &counterparty),
            Err(Error::InvalidSettlementId(31))
        ));
        assert!(matches!(
            leaf.add_settlement_id(&[0x09; 32], &counterparty, &counterparty),
            Err(Error::AccountOrPathMismatch(_))
        ));
        assert!(matches!(leaf.new_external_address(None), Err(Error::WrongLeafKind(_))));

        let own_chained = chained_public_key(&own, &settlement_id).unwrap();
        let other_chained = chained_public_key(&counterparty, &settlement_id).unwrap();
        let signer = leaf.signing_resolver(TEST_PASSWORD).unwrap();
        assert_eq!(
            signer.resolve_public_key_or_script(address.unprefixed()).unwrap(),
            Address::settlement_script(&own_chained, &other_chained)
        );
        let private_key = signer.resolve_private_key(&own_chained).unwrap();
        assert_eq!(public_key_from_private(&private_key).unwrap(), own_chained);
        assert!(matches!(
            signer.resolve_private_key(&other_chained),
            Err(Error::NoPrivateKeyAccess)
        ));
    }

    #[test]
    fn test_color_coin_leaf_survives_reload() {
        let store = Arc::new(MemoryStore::new());
        let wallet = encrypted_wallet();
        let root = wallet.unlock(TEST_PASSWORD).unwrap();
        let group = wallet.create_group(CoinType::BlockSettleCC.as_u32());
        let leaf = group.create_cc_leaf("GOLD", Some(&root)).unwrap();
        let address = leaf.new_change_address(None).unwrap();
        assert!(leaf.is_external_address(&address));
        wallet.persist_to_store(store.clone()).unwrap();

        let loaded = Wallet::load(store, settings()).unwrap();
        let loaded_leaf = loaded.find_leaf_for_address(&address).unwrap();
        assert_eq!(loaded_leaf.path(), leaf.path());
        assert_eq!(loaded_leaf.policy(), leaf.policy());
    }
}

// ============================================================================
// Resolver Tests
// ============================================================================

mod resolvers {
    use super::*;

    #[test]
    fn test_public_resolver() {
        let wallet = encrypted_wallet();
        let leaf = wallet.create_structure(TEST_PASSWORD).unwrap();
        let address = leaf.new_external_address(Some(AddressType::P2wpkh)).unwrap();

        let resolver = leaf.resolver().unwrap();
        assert!(!resolver.is_empty());
        let public_key = resolver.resolve_public_key_or_script(address.unprefixed()).unwrap();
        assert_eq!(leaf.public_key_for(&address).unwrap().to_vec(), public_key);
        assert!(matches!(
            resolver.resolve_private_key(&public_key),
            Err(Error::NoPrivateKeyAccess)
        ));
        assert!(matches!(
            resolver.resolve_public_key_or_script(&[0u8; 20]),
            Err(Error::AccountOrPathMismatch(_))
        ));
    }

    #[test]
    fn test_signing_resolver_checks_passphrase() {
        let wallet = encrypted_wallet();
        let leaf = wallet.create_structure(TEST_PASSWORD).unwrap();
        leaf.new_external_address(None).unwrap();

        let err = leaf.signing_resolver(b"wrong").unwrap_err();
        assert!(err.is_wrong_passphrase());

        let signer = leaf.signing_resolver(TEST_PASSWORD).unwrap();
        let foreign = public_key_from_private(&[0x11; 32]).unwrap();
        assert!(matches!(
            signer.resolve_private_key(&foreign),
            Err(Error::NoPrivateKeyAccess)
        ));
    }

    #[test]
    fn test_shutdown_leaf_rejects_everything() {
        let wallet = encrypted_wallet();
        let leaf = wallet.create_structure(TEST_PASSWORD).unwrap();
        leaf.shutdown();
        assert!(matches!(leaf.new_external_address(None), Err(Error::LeafShutdown)));
        assert!(matches!(leaf.resolver(), Err(Error::LeafShutdown)));
    }
}

// ============================================================================
// Damaged Wallet Tests
// ============================================================================

mod load_defects {
    use super::*;

    #[test]
    fn test_damaged_group_is_skipped() {
        let store = Arc::new(MemoryStore::new());
        let wallet = encrypted_wallet();
        let leaf = wallet.create_structure(TEST_PASSWORD).unwrap();
        let address = leaf.new_external_address(None).unwrap();
        let root = wallet.unlock(TEST_PASSWORD).unwrap();
        wallet
            .create_group(CoinType::BlockSettleCC.as_u32())
            .create_cc_leaf("SILVER", Some(&root))
            .unwrap();
        wallet.persist_to_store(store.clone()).unwrap();

        // Truncate the XBT group record
        let key = [0x8A, 0x00, 0x00, 0x00, 0x01];
        let value = store.get(&key).unwrap().unwrap();
        store.put(&key, &value[..value.len() / 2]).unwrap();

        let loaded = Wallet::load(store, settings()).unwrap();
        assert_eq!(loaded.load_defects().len(), 1);
        assert!(loaded.get_group(CoinType::BitcoinTest.as_u32()).is_none());
        assert!(loaded.get_group(CoinType::BlockSettleCC.as_u32()).is_some());
        assert!(loaded.find_leaf_for_address(&address).is_none());
    }

    #[test]
    fn test_missing_header_fails() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        assert!(Wallet::load(store, settings()).is_err());
    }
}
