//! Passphrase-encrypted key store backing an account.
//!
//! Key material is a fixed pool of pre-generated P2PKH keys plus any
//! imported keys. Each 32-byte secret is stored XORed with the first half
//! of a scrypt-derived 64-byte master key and AES-256 encrypted under the
//! second half; a truncated double-SHA256 of the derived key is kept to
//! verify the passphrase on unlock. While unlocked, the derived key lives
//! in memory (zeroized on lock and drop); `is_locked` is exactly "no key
//! material in memory".

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes256;
use bitcoin::hashes::{sha256d, Hash};
use bitcoin::secp256k1::{Secp256k1, SecretKey};
use bitcoin::{Address, Network, NetworkKind, PrivateKey, PublicKey};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{KeyStoreError, StorageError};
use crate::types::BlockStamp;

const SCRYPT_LOG_N: u8 = 14;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const MASTER_KEY_LEN: usize = 64;
const SALT_LEN: usize = 8;
const CHECK_LEN: usize = 4;

/// One key held by the store.
#[derive(Debug, Clone)]
struct KeyEntry {
    pubkey: PublicKey,
    encrypted_secret: [u8; 32],
    first_seen: BlockStamp,
    imported: bool,
}

impl KeyEntry {
    fn address(&self, network: Network) -> Address {
        Address::p2pkh(self.pubkey.pubkey_hash(), network)
    }
}

/// Encrypted key store for a single account.
pub struct KeyStore {
    network: Network,
    description: String,
    salt: [u8; SALT_LEN],
    check: [u8; CHECK_LEN],
    entries: Vec<KeyEntry>,
    next_unused: usize,
    created_at: BlockStamp,
    master: Option<Zeroizing<[u8; MASTER_KEY_LEN]>>,
    unlock_gen: u64,
    dirty: bool,
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("network", &self.network)
            .field("entries", &self.entries.len())
            .field("next_unused", &self.next_unused)
            .field("locked", &self.master.is_none())
            .finish()
    }
}

impl KeyStore {
    /// Create a new store encrypted under `passphrase`, with `pool_size`
    /// pre-generated keys. The store starts locked and dirty.
    pub fn create(
        network: Network,
        description: &str,
        passphrase: &str,
        created_at: BlockStamp,
        pool_size: usize,
    ) -> Result<Self, KeyStoreError> {
        let salt: [u8; SALT_LEN] = rand::random();
        let master = derive_master_key(passphrase, &salt)?;
        let check = master_check(&master);

        let secp = Secp256k1::new();
        let mut entries = Vec::with_capacity(pool_size);
        for _ in 0..pool_size {
            let secret = SecretKey::new(&mut rand::thread_rng());
            let pubkey = PrivateKey::new(secret, network).public_key(&secp);
            entries.push(KeyEntry {
                pubkey,
                encrypted_secret: encrypt_secret(&secret, &master)?,
                first_seen: created_at,
                imported: false,
            });
        }

        Ok(Self {
            network,
            description: description.to_string(),
            salt,
            check,
            entries,
            next_unused: 0,
            created_at,
            master: None,
            unlock_gen: 0,
            dirty: true,
        })
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn created_at(&self) -> BlockStamp {
        self.created_at
    }

    /// Whether no decryption key is in memory.
    pub fn is_locked(&self) -> bool {
        self.master.is_none()
    }

    /// Generation counter bumped by every successful unlock. Auto-lock
    /// timers capture the generation so a newer unlock supersedes them.
    pub fn unlock_generation(&self) -> u64 {
        self.unlock_gen
    }

    /// Attempt decryption with `passphrase`, keeping the derived key in
    /// memory on success.
    pub fn unlock(&mut self, passphrase: &str) -> Result<(), KeyStoreError> {
        let master = derive_master_key(passphrase, &self.salt)?;
        if master_check(&master) != self.check {
            return Err(KeyStoreError::IncorrectPassphrase);
        }
        self.master = Some(master);
        self.unlock_gen += 1;
        Ok(())
    }

    /// Wipe the in-memory key material. Fails if there is nothing to wipe.
    pub fn lock(&mut self) -> Result<(), KeyStoreError> {
        if self.master.take().is_none() {
            return Err(KeyStoreError::Locked);
        }
        Ok(())
    }

    /// Hand out the next unused pool address, marking the store dirty.
    pub fn next_unused_address(&mut self) -> Result<Address, KeyStoreError> {
        // TODO: extend the pool by generating fresh keys once the initial
        // pool runs out; callers currently surface this as an internal error.
        let address = self
            .entries
            .iter()
            .filter(|e| !e.imported)
            .nth(self.next_unused)
            .ok_or(KeyStoreError::AddressPoolExhausted)?
            .address(self.network);
        self.next_unused += 1;
        self.dirty = true;
        Ok(address)
    }

    /// All payment addresses active for this account: handed-out pool
    /// addresses plus imported keys, sorted by textual form.
    pub fn active_addresses(&self) -> Vec<Address> {
        let mut addrs: Vec<Address> = self
            .entries
            .iter()
            .filter(|e| e.imported)
            .chain(self.entries.iter().filter(|e| !e.imported).take(self.next_unused))
            .map(|e| e.address(self.network))
            .collect();
        addrs.sort_by_key(|a| a.to_string());
        addrs
    }

    /// WIF encoding of the private key for `address`.
    pub fn wif_for_address(&self, address: &Address) -> Result<String, KeyStoreError> {
        let entry = self.find_entry(address)?;
        let secret = self.decrypt_secret(entry)?;
        Ok(self.private_key(secret, entry.pubkey.compressed).to_wif())
    }

    /// WIF encodings of every private key in the store, sorted.
    pub fn dump_wifs(&self) -> Result<Vec<String>, KeyStoreError> {
        let mut wifs = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let secret = self.decrypt_secret(entry)?;
            wifs.push(self.private_key(secret, entry.pubkey.compressed).to_wif());
        }
        wifs.sort();
        Ok(wifs)
    }

    /// Decode a WIF private key and install it as an imported entry,
    /// marking the store dirty. Requires the store to be unlocked so the
    /// new secret can be encrypted under the master key.
    pub fn import_wif(
        &mut self,
        wif: &str,
        first_seen: BlockStamp,
    ) -> Result<Address, KeyStoreError> {
        let master = self.master.as_ref().ok_or(KeyStoreError::Locked)?;
        let privkey = PrivateKey::from_wif(wif)
            .map_err(|e| KeyStoreError::InvalidKey(e.to_string()))?;
        if privkey.network != NetworkKind::from(self.network) {
            return Err(KeyStoreError::InvalidKey(
                "key encoded for a different network".to_string(),
            ));
        }
        let secp = Secp256k1::new();
        let entry = KeyEntry {
            pubkey: privkey.public_key(&secp),
            encrypted_secret: encrypt_secret(&privkey.inner, master)?,
            first_seen,
            imported: true,
        };
        let address = entry.address(self.network);
        self.entries.push(entry);
        self.dirty = true;
        Ok(address)
    }

    /// Secret and public key for `address`, for transaction signing.
    pub fn keys_for_address(
        &self,
        address: &Address,
    ) -> Result<(SecretKey, PublicKey), KeyStoreError> {
        let entry = self.find_entry(address)?;
        Ok((self.decrypt_secret(entry)?, entry.pubkey))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    fn find_entry(&self, address: &Address) -> Result<&KeyEntry, KeyStoreError> {
        self.entries
            .iter()
            .find(|e| &e.address(self.network) == address)
            .ok_or(KeyStoreError::AddressNotFound)
    }

    fn decrypt_secret(&self, entry: &KeyEntry) -> Result<SecretKey, KeyStoreError> {
        let master = self.master.as_ref().ok_or(KeyStoreError::Locked)?;
        decrypt_secret(&entry.encrypted_secret, master)
    }

    fn private_key(&self, secret: SecretKey, compressed: bool) -> PrivateKey {
        if compressed {
            PrivateKey::new(secret, self.network)
        } else {
            PrivateKey::new_uncompressed(secret, self.network)
        }
    }

    /// On-disk form. The in-memory master key never leaves the process.
    pub fn to_record(&self) -> KeyStoreRecord {
        KeyStoreRecord {
            network: self.network,
            description: self.description.clone(),
            salt: hex::encode(self.salt),
            check: hex::encode(self.check),
            next_unused: self.next_unused,
            created_at: self.created_at,
            entries: self
                .entries
                .iter()
                .map(|e| KeyEntryRecord {
                    pubkey: hex::encode(e.pubkey.to_bytes()),
                    encrypted_secret: hex::encode(e.encrypted_secret),
                    first_seen: e.first_seen,
                    imported: e.imported,
                })
                .collect(),
        }
    }

    /// Rebuild a locked store from its on-disk form.
    pub fn from_record(record: &KeyStoreRecord) -> Result<Self, StorageError> {
        let salt = decode_array::<SALT_LEN>(&record.salt, "keystore salt")?;
        let check = decode_array::<CHECK_LEN>(&record.check, "keystore check")?;
        let mut entries = Vec::with_capacity(record.entries.len());
        for e in &record.entries {
            let pubkey_bytes = hex::decode(&e.pubkey)
                .map_err(|err| StorageError::Corruption(format!("key entry pubkey: {err}")))?;
            let pubkey = PublicKey::from_slice(&pubkey_bytes)
                .map_err(|err| StorageError::Corruption(format!("key entry pubkey: {err}")))?;
            entries.push(KeyEntry {
                pubkey,
                encrypted_secret: decode_array::<32>(&e.encrypted_secret, "key entry secret")?,
                first_seen: e.first_seen,
                imported: e.imported,
            });
        }
        Ok(Self {
            network: record.network,
            description: record.description.clone(),
            salt,
            check,
            entries,
            next_unused: record.next_unused,
            created_at: record.created_at,
            master: None,
            unlock_gen: 0,
            dirty: false,
        })
    }
}

/// Serializable form of a [`KeyStore`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyStoreRecord {
    pub network: Network,
    pub description: String,
    pub salt: String,
    pub check: String,
    pub next_unused: usize,
    pub created_at: BlockStamp,
    pub entries: Vec<KeyEntryRecord>,
}

/// Serializable form of one key entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyEntryRecord {
    pub pubkey: String,
    pub encrypted_secret: String,
    pub first_seen: BlockStamp,
    pub imported: bool,
}

fn decode_array<const N: usize>(s: &str, what: &str) -> Result<[u8; N], StorageError> {
    let bytes =
        hex::decode(s).map_err(|e| StorageError::Corruption(format!("{what}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| StorageError::Corruption(format!("{what}: wrong length")))
}

fn derive_master_key(
    passphrase: &str,
    salt: &[u8],
) -> Result<Zeroizing<[u8; MASTER_KEY_LEN]>, KeyStoreError> {
    let params = scrypt::Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, MASTER_KEY_LEN)
        .map_err(|e| KeyStoreError::Crypto(e.to_string()))?;
    let mut derived = Zeroizing::new([0u8; MASTER_KEY_LEN]);
    scrypt::scrypt(passphrase.as_bytes(), salt, &params, &mut derived[..])
        .map_err(|e| KeyStoreError::Crypto(e.to_string()))?;
    Ok(derived)
}

fn master_check(master: &[u8; MASTER_KEY_LEN]) -> [u8; CHECK_LEN] {
    let digest = sha256d::Hash::hash(master);
    let mut check = [0u8; CHECK_LEN];
    check.copy_from_slice(&digest.as_byte_array()[..CHECK_LEN]);
    check
}

/// XOR with the first half of the master key, then AES-256 encrypt both
/// 16-byte blocks under the second half.
fn encrypt_secret(
    secret: &SecretKey,
    master: &[u8; MASTER_KEY_LEN],
) -> Result<[u8; 32], KeyStoreError> {
    let mut payload = [0u8; 32];
    let secret_bytes = secret.secret_bytes();
    for i in 0..32 {
        payload[i] = secret_bytes[i] ^ master[i];
    }

    let cipher = Aes256::new(GenericArray::from_slice(&master[32..64]));
    let mut block1 = GenericArray::clone_from_slice(&payload[0..16]);
    let mut block2 = GenericArray::clone_from_slice(&payload[16..32]);
    cipher.encrypt_block(&mut block1);
    cipher.encrypt_block(&mut block2);

    let mut out = [0u8; 32];
    out[0..16].copy_from_slice(&block1);
    out[16..32].copy_from_slice(&block2);
    Ok(out)
}

fn decrypt_secret(
    encrypted: &[u8; 32],
    master: &[u8; MASTER_KEY_LEN],
) -> Result<SecretKey, KeyStoreError> {
    let cipher = Aes256::new(GenericArray::from_slice(&master[32..64]));
    let mut block1 = GenericArray::clone_from_slice(&encrypted[0..16]);
    let mut block2 = GenericArray::clone_from_slice(&encrypted[16..32]);
    cipher.decrypt_block(&mut block1);
    cipher.decrypt_block(&mut block2);

    let mut payload = Zeroizing::new([0u8; 32]);
    payload[0..16].copy_from_slice(&block1);
    payload[16..32].copy_from_slice(&block2);
    for i in 0..32 {
        payload[i] ^= master[i];
    }

    SecretKey::from_slice(&payload[..])
        .map_err(|e| KeyStoreError::InvalidKey(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> KeyStore {
        KeyStore::create(
            Network::Regtest,
            "test",
            "hunter2",
            BlockStamp::at_height(100),
            3,
        )
        .expect("store creation")
    }

    #[test]
    fn new_store_is_locked_with_no_active_addresses() {
        let store = test_store();
        assert!(store.is_locked());
        assert!(store.active_addresses().is_empty());
        assert!(store.is_dirty());
    }

    #[test]
    fn unlock_with_wrong_passphrase_fails() {
        let mut store = test_store();
        assert_eq!(
            store.unlock("wrong"),
            Err(KeyStoreError::IncorrectPassphrase)
        );
        assert!(store.is_locked());

        store.unlock("hunter2").unwrap();
        assert!(!store.is_locked());
    }

    #[test]
    fn each_unlock_bumps_the_generation() {
        let mut store = test_store();
        store.unlock("hunter2").unwrap();
        let first = store.unlock_generation();
        store.lock().unwrap();
        store.unlock("hunter2").unwrap();
        assert!(store.unlock_generation() > first);
    }

    #[test]
    fn locking_a_locked_store_fails() {
        let mut store = test_store();
        assert_eq!(store.lock(), Err(KeyStoreError::Locked));
        store.unlock("hunter2").unwrap();
        store.lock().unwrap();
        assert_eq!(store.lock(), Err(KeyStoreError::Locked));
    }

    #[test]
    fn address_pool_is_finite() {
        let mut store = test_store();
        for _ in 0..3 {
            store.next_unused_address().unwrap();
        }
        assert_eq!(
            store.next_unused_address(),
            Err(KeyStoreError::AddressPoolExhausted)
        );
        assert_eq!(store.active_addresses().len(), 3);
    }

    #[test]
    fn wif_round_trips_through_import() {
        let mut store = test_store();
        store.unlock("hunter2").unwrap();

        let secret = SecretKey::new(&mut rand::thread_rng());
        let wif = PrivateKey::new(secret, Network::Regtest).to_wif();
        let addr = store.import_wif(&wif, BlockStamp::at_height(0)).unwrap();

        assert_eq!(store.wif_for_address(&addr).unwrap(), wif);
        assert!(store.active_addresses().contains(&addr));
    }

    #[test]
    fn import_requires_unlocked_store() {
        let mut store = test_store();
        let wif =
            PrivateKey::new(SecretKey::new(&mut rand::thread_rng()), Network::Regtest).to_wif();
        assert_eq!(
            store.import_wif(&wif, BlockStamp::at_height(0)),
            Err(KeyStoreError::Locked)
        );
    }

    #[test]
    fn key_material_is_unreadable_while_locked() {
        let mut store = test_store();
        store.unlock("hunter2").unwrap();
        let addr = store.next_unused_address().unwrap();
        store.lock().unwrap();

        assert_eq!(store.wif_for_address(&addr), Err(KeyStoreError::Locked));
        assert_eq!(store.dump_wifs(), Err(KeyStoreError::Locked));
    }

    #[test]
    fn record_round_trip_preserves_keys() {
        let mut store = test_store();
        store.unlock("hunter2").unwrap();
        let addr = store.next_unused_address().unwrap();
        let wif = store.wif_for_address(&addr).unwrap();

        let mut restored = KeyStore::from_record(&store.to_record()).unwrap();
        assert!(restored.is_locked());
        assert!(!restored.is_dirty());
        restored.unlock("hunter2").unwrap();
        assert_eq!(restored.wif_for_address(&addr).unwrap(), wif);
        assert_eq!(restored.active_addresses(), store.active_addresses());
    }
}
