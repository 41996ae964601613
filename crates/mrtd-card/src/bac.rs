//! Basic Access Control mutual authentication
//!
//! SELECT the travel document applet, exchange challenges, prove knowledge
//! of the MRZ-derived keys and establish the secure messaging channel. The
//! authenticator is an explicit state machine; on any failure it moves to
//! `Failed` and never hands out partially established keys.

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::debug;
use zeroize::Zeroizing;

use crate::apdu::{commands, Transceiver};
use crate::crypto::{derive_session_keys, retail_mac, tdes_cbc_decrypt, tdes_cbc_encrypt, SessionKeys};
use crate::error::MrtdError;
use crate::secure::SecureChannel;

/// AID of the ICAO travel document applet
pub const MRTD_AID: &[u8] = &[0xA0, 0x00, 0x00, 0x02, 0x47, 0x10, 0x01];

/// Authentication progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacState {
    Idle,
    Selected,
    ChallengeReceived,
    Authenticated,
    Failed,
}

/// Runs BAC against a chip and yields a [`SecureChannel`] on success.
pub struct BacAuthenticator<'a, T: Transceiver + ?Sized> {
    chip: &'a mut T,
    state: BacState,
}

impl<'a, T: Transceiver + ?Sized> BacAuthenticator<'a, T> {
    pub fn new(chip: &'a mut T) -> Self {
        Self {
            chip,
            state: BacState::Idle,
        }
    }

    /// Current protocol state
    pub fn state(&self) -> BacState {
        self.state
    }

    /// Perform the full SELECT / GET CHALLENGE / EXTERNAL AUTHENTICATE
    /// exchange with the MRZ-derived seed keys.
    pub fn authenticate(&mut self, seed_keys: &SessionKeys) -> Result<SecureChannel, MrtdError> {
        match self.run(seed_keys) {
            Ok(channel) => {
                self.state = BacState::Authenticated;
                Ok(channel)
            }
            Err(err) => {
                self.state = BacState::Failed;
                Err(err)
            }
        }
    }

    fn run(&mut self, seed_keys: &SessionKeys) -> Result<SecureChannel, MrtdError> {
        // Step 1: SELECT the applet
        let response = commands::select_applet(MRTD_AID).send(self.chip)?;
        if !response.is_success() {
            return Err(MrtdError::ApplicationNotFound {
                sw: response.status_word(),
            });
        }
        self.state = BacState::Selected;
        debug!("travel document applet selected");

        // Step 2: GET CHALLENGE for RND.IC
        let response = commands::get_challenge().send(self.chip)?;
        if !response.is_success() {
            return Err(MrtdError::BacAuthenticationFailed(format!(
                "GET CHALLENGE rejected with status 0x{:04X}",
                response.status_word()
            )));
        }
        let rnd_ic: [u8; 8] = response.data.as_slice().try_into().map_err(|_| {
            MrtdError::BacAuthenticationFailed(format!(
                "challenge has length {}, expected 8",
                response.data.len()
            ))
        })?;
        self.state = BacState::ChallengeReceived;

        // Step 3: local nonce and key contribution
        let mut rnd_ifd = [0u8; 8];
        let mut k_ifd = Zeroizing::new([0u8; 16]);
        OsRng.fill_bytes(&mut rnd_ifd);
        OsRng.fill_bytes(k_ifd.as_mut());

        // Step 4: S = RND.IFD || RND.IC || K.IFD, encrypted then MACed
        let mut s = Zeroizing::new([0u8; 32]);
        s[..8].copy_from_slice(&rnd_ifd);
        s[8..16].copy_from_slice(&rnd_ic);
        s[16..].copy_from_slice(k_ifd.as_ref());

        let e_ifd = tdes_cbc_encrypt(&seed_keys.k_enc, s.as_ref());
        let m_ifd = retail_mac(&seed_keys.k_mac, &e_ifd);

        let mut payload = Vec::with_capacity(40);
        payload.extend_from_slice(&e_ifd);
        payload.extend_from_slice(&m_ifd);

        // Step 5: EXTERNAL AUTHENTICATE and response verification
        let response = commands::external_authenticate(payload).send(self.chip)?;
        if !response.is_success() {
            return Err(MrtdError::BacAuthenticationFailed(format!(
                "EXTERNAL AUTHENTICATE rejected with status 0x{:04X}",
                response.status_word()
            )));
        }
        if response.data.len() != 40 {
            return Err(MrtdError::BacAuthenticationFailed(format!(
                "authentication response has length {}, expected 40",
                response.data.len()
            )));
        }

        let e_ic = &response.data[..32];
        let m_ic = &response.data[32..40];
        let computed = retail_mac(&seed_keys.k_mac, e_ic);
        if !bool::from(computed.ct_eq(m_ic)) {
            return Err(MrtdError::BacAuthenticationFailed(
                "response MAC verification failed".into(),
            ));
        }

        let decrypted = Zeroizing::new(tdes_cbc_decrypt(&seed_keys.k_enc, e_ic));
        // Chip replies with RND.IC || RND.IFD || K.IC
        if !bool::from(decrypted[..8].ct_eq(&rnd_ic)) {
            return Err(MrtdError::BacAuthenticationFailed(
                "RND.IC echo mismatch".into(),
            ));
        }
        if !bool::from(decrypted[8..16].ct_eq(&rnd_ifd)) {
            return Err(MrtdError::BacAuthenticationFailed(
                "RND.IFD echo mismatch".into(),
            ));
        }

        // Session seed is K.IFD xor K.IC; keys re-derived the same way as
        // the MRZ seed keys.
        let mut seed = Zeroizing::new([0u8; 16]);
        for (out, (a, b)) in seed
            .iter_mut()
            .zip(k_ifd.iter().zip(decrypted[16..32].iter()))
        {
            *out = a ^ b;
        }
        let session_keys = derive_session_keys(seed.as_ref());

        // SSC starts from the low halves of both nonces
        let mut ssc_bytes = [0u8; 8];
        ssc_bytes[..4].copy_from_slice(&rnd_ic[4..]);
        ssc_bytes[4..].copy_from_slice(&rnd_ifd[4..]);
        let ssc = u64::from_be_bytes(ssc_bytes);

        debug!("BAC mutual authentication complete");
        Ok(SecureChannel::new(session_keys, ssc))
    }
}
