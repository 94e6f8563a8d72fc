/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/.
 *
 * (c) ZeroTier, Inc.
 * https://www.zerotier.com/
 */
use std::io;

use rand_core::RngCore;
use zeroize::Zeroizing;

use crate::application::{ApplicationLayer, CryptoLayer};
use crate::crypto::*;
use crate::log_event::log;
use crate::proto::*;
#[cfg(feature = "logging")]
use crate::LogEvent::*;

/// A 32 byte retained secret.
pub type RetainedSecret = Secret<RETAINED_SECRET_SIZE>;

const RECORD_SIZE_ONE_SECRET: usize = 8 + 1 + RETAINED_SECRET_SIZE;
const RECORD_SIZE_TWO_SECRETS: usize = RECORD_SIZE_ONE_SECRET + RETAINED_SECRET_SIZE;

/// The retained secrets shared with one remote ZID, together with their expiry and the trust
/// the user placed in them by verifying the SAS.
///
/// Implements constant time equality.
///
/// The store holds this as opaque bytes: the expiry as 8 little-endian bytes of absolute time,
/// one trust byte, `rs1`, and `rs2` if present.
#[derive(Clone, Eq)]
pub struct CacheRecord {
    expiry: i64,
    trust: bool,
    rs1: RetainedSecret,
    rs2: Option<RetainedSecret>,
}

impl PartialEq for CacheRecord {
    fn eq(&self, other: &Self) -> bool {
        let rs2 = match (self.rs2.as_ref(), other.rs2.as_ref()) {
            (Some(a), Some(b)) => a == b,
            (None, None) => true,
            _ => false,
        };
        rs2 & (self.rs1 == other.rs1) & (self.expiry == other.expiry) & (self.trust == other.trust)
    }
}

impl std::fmt::Debug for CacheRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRecord")
            .field("expiry", &self.expiry)
            .field("trust", &self.trust)
            .field("has_rs2", &self.rs2.is_some())
            .finish()
    }
}

impl CacheRecord {
    pub fn new(expiry: i64, trust: bool, rs1: RetainedSecret, rs2: Option<RetainedSecret>) -> Self {
        Self { expiry, trust, rs1, rs2 }
    }

    /// Decode a stored record. Records written before the trust byte existed (40 or 72 bytes)
    /// decode as untrusted. Any other unexpected length gives `None`.
    pub fn decode(data: &[u8]) -> Option<Self> {
        let (trust, rest) = match data.len() {
            RECORD_SIZE_ONE_SECRET | RECORD_SIZE_TWO_SECRETS => (data[8] != 0, &data[9..]),
            40 | 72 => (false, &data[8..]),
            _ => return None,
        };
        let expiry = i64::from_le_bytes(data[..8].try_into().ok()?);
        let rs1 = RetainedSecret::from_slice(&rest[..RETAINED_SECRET_SIZE])?;
        let rs2 = if rest.len() > RETAINED_SECRET_SIZE {
            Some(RetainedSecret::from_slice(&rest[RETAINED_SECRET_SIZE..])?)
        } else {
            None
        };
        Some(Self { expiry, trust, rs1, rs2 })
    }

    pub fn encode(&self) -> Zeroizing<Vec<u8>> {
        let mut out = Zeroizing::new(Vec::with_capacity(RECORD_SIZE_TWO_SECRETS));
        out.extend_from_slice(&self.expiry.to_le_bytes());
        out.push(self.trust as u8);
        out.extend_from_slice(self.rs1.as_bytes());
        if let Some(rs2) = &self.rs2 {
            out.extend_from_slice(rs2.as_bytes());
        }
        out
    }

    /// Absolute expiry time, in the units of `ApplicationLayer::time`.
    pub fn expiry(&self) -> i64 {
        self.expiry
    }
    pub fn trust(&self) -> bool {
        self.trust
    }
    pub fn rs1(&self) -> &RetainedSecret {
        &self.rs1
    }
    pub fn rs2(&self) -> Option<&RetainedSecret> {
        self.rs2.as_ref()
    }
}

/// Store key of the record for a remote ZID: its uppercase hex form.
pub fn zid_key(zid: &[u8; ZID_SIZE]) -> String {
    hex::encode_upper(zid)
}

/// A stored trust flag only counts while the record is bound to someone in the address book.
fn bound_to_contact<C: CryptoLayer, App: ApplicationLayer<C>>(app: &mut App, number: Option<&str>) -> bool {
    number.map_or(false, |n| app.is_in_address_book(n))
}

/// Load the local ZID from the store, creating and saving a random one on first use.
pub(crate) fn local_zid<C: CryptoLayer, App: ApplicationLayer<C>>(
    app: &mut App,
    rng: &mut C::Rng,
) -> io::Result<[u8; ZID_SIZE]> {
    if let Some(record) = app.load_record(LOCAL_ZID_KEY)? {
        if let Ok(zid) = record.data.as_slice().try_into() {
            return Ok(zid);
        }
    }
    let mut zid = [0u8; ZID_SIZE];
    rng.fill_bytes(&mut zid);
    app.save_record(LOCAL_ZID_KEY, &zid, None)?;
    log!(app, CreatedLocalZid);
    Ok(zid)
}

/// The cache entry of the remote ZID the current session talks to.
///
/// Retained secrets are only exposed if the stored record had not expired when it was selected,
/// and trust is only reported if the bound phone number is in the address book.
#[derive(Default)]
pub(crate) struct SecretCache {
    key: Option<String>,
    rs1: Option<RetainedSecret>,
    rs2: Option<RetainedSecret>,
    trust: bool,
    number: Option<String>,
}

impl SecretCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rs1(&self) -> Option<&RetainedSecret> {
        self.rs1.as_ref()
    }
    pub fn rs2(&self) -> Option<&RetainedSecret> {
        self.rs2.as_ref()
    }
    pub fn trust(&self) -> bool {
        self.trust
    }
    pub fn number(&self) -> Option<&str> {
        self.number.as_deref()
    }

    /// Make `zid` the current entry and load it. Selecting the current entry again is a no-op.
    pub fn select<C: CryptoLayer, App: ApplicationLayer<C>>(
        &mut self,
        app: &mut App,
        zid: &[u8; ZID_SIZE],
    ) -> io::Result<()> {
        let key = zid_key(zid);
        if self.key.as_deref() == Some(key.as_str()) {
            return Ok(());
        }
        *self = Self::default();
        let stored = app.load_record(&key)?;
        self.key = Some(key);
        let Some(stored) = stored else {
            return Ok(());
        };
        match CacheRecord::decode(&stored.data) {
            Some(record) => {
                if record.expiry > app.time() {
                    self.trust = record.trust;
                    self.rs1 = Some(record.rs1);
                    self.rs2 = record.rs2;
                }
            }
            None => {
                log!(app, InvalidCacheRecord);
            }
        }
        self.number = stored.phone_number;
        self.trust &= bound_to_contact::<C, App>(app, self.number.as_deref());
        Ok(())
    }

    /// Replace the current entry. An `expiry` of zero removes it from the store instead.
    pub fn update<C: CryptoLayer, App: ApplicationLayer<C>>(
        &mut self,
        app: &mut App,
        expiry: i64,
        trust: bool,
        rs1: RetainedSecret,
        rs2: Option<RetainedSecret>,
        number: Option<&str>,
    ) -> io::Result<()> {
        let Some(key) = self.key.clone() else {
            return Ok(());
        };
        if expiry == 0 {
            app.remove_record(&key)?;
            self.trust = false;
            self.rs1 = None;
            self.rs2 = None;
            self.number = None;
        } else {
            let record = CacheRecord::new(expiry, trust, rs1, rs2);
            app.save_record(&key, &record.encode(), number)?;
            self.trust = trust && bound_to_contact::<C, App>(app, number);
            self.rs1 = Some(record.rs1.clone());
            self.rs2 = record.rs2.clone();
            self.number = number.map(str::to_string);
        }
        Ok(())
    }

    /// Rebind the current entry to a new phone number, keeping its secrets.
    pub fn update_number<C: CryptoLayer, App: ApplicationLayer<C>>(
        &mut self,
        app: &mut App,
        number: Option<&str>,
    ) -> io::Result<()> {
        self.number = number.map(str::to_string);
        if let Some(key) = self.key.as_deref() {
            if let Some(stored) = app.load_record(key)? {
                app.save_record(key, &stored.data, number)?;
            }
        }
        Ok(())
    }

    /// Clear the trust flag of the record for `zid`, as asked by a peer that no longer
    /// considers the SAS verified.
    pub fn reset_trust<C: CryptoLayer, App: ApplicationLayer<C>>(
        &mut self,
        app: &mut App,
        zid: &[u8; ZID_SIZE],
    ) -> io::Result<()> {
        let key = zid_key(zid);
        let Some(stored) = app.load_record(&key)? else {
            return Ok(());
        };
        if let Some(mut record) = CacheRecord::decode(&stored.data) {
            record.trust = false;
            app.save_record(&key, &record.encode(), stored.phone_number.as_deref())?;
        }
        if self.key.as_deref() == Some(key.as_str()) {
            self.trust = false;
        }
        Ok(())
    }

    /// Look for a record of another ZID bound to `number`. If one exists it is removed, and
    /// whether it was trusted is returned.
    ///
    /// A trusted contact showing up with a new ZID is either a reinstall or a man in the
    /// middle borrowing their caller ID.
    pub fn is_new_zid_for_trusted_user<C: CryptoLayer, App: ApplicationLayer<C>>(
        &self,
        app: &mut App,
        number: Option<&str>,
    ) -> io::Result<bool> {
        let Some(number) = number else {
            return Ok(false);
        };
        for key in app.record_keys()? {
            if key == LOCAL_ZID_KEY {
                continue;
            }
            let Some(stored) = app.load_record(&key)? else {
                continue;
            };
            let Some(cached) = stored.phone_number.as_deref() else {
                continue;
            };
            if app.matching_numbers(cached, number) {
                let was_trusted = CacheRecord::decode(&stored.data).map_or(false, |r| r.trust);
                app.remove_record(&key)?;
                return Ok(was_trusted);
            }
        }
        Ok(false)
    }
}
