//! Local stand-ins for the wallet, signer and network.

use std::sync::atomic::{AtomicU64, Ordering};

use sha2::{Digest, Sha256};

use dlc_sdk::{
    Amount, BitcoinInput, BroadcastAck, BroadcastService, Error, InputSelector, Participant,
    ParticipantId, SerializedTx, SigningArtifact, SigningService, Transaction, TxId, WitnessUtxo,
};

/// Derives one fresh outpoint per request from the owner's id and a counter,
/// rejecting requests above the participant's configured balance.
#[derive(Debug, Default)]
pub struct SimulatedWallet {
    counter: AtomicU64,
}

impl InputSelector for SimulatedWallet {
    fn select_input(&self, owner: &Participant, amount: Amount) -> dlc_sdk::Result<BitcoinInput> {
        if owner.balance < amount {
            return Err(Error::InputSelection(format!(
                "{} has {} sats available, needs {amount}",
                owner.name, owner.balance
            )));
        }
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = Sha256::new();
        hasher.update(owner.id.as_str().as_bytes());
        hasher.update(amount.to_be_bytes());
        hasher.update(n.to_be_bytes());
        let txid = hex::encode(hasher.finalize());

        // P2WPKH-shaped script over a hash of the owner's key.
        let key_hash = Sha256::digest(owner.public_key.as_bytes());
        let mut script = vec![0x00, 0x14];
        script.extend_from_slice(&key_hash[..20]);

        Ok(BitcoinInput {
            txid,
            vout: 0,
            amount,
            witness_utxo: WitnessUtxo { script, amount },
            owner: owner.id.clone(),
            owner_pubkey: owner.public_key.clone(),
        })
    }
}

/// Produces artifacts by hashing; holds no keys.
#[derive(Debug, Default)]
pub struct SimulatedSigner;

impl SigningService for SimulatedSigner {
    fn sign(&self, participant: &ParticipantId, tx_id: &TxId) -> dlc_sdk::Result<SigningArtifact> {
        let mut hasher = Sha256::new();
        hasher.update(b"dlc-live/sig");
        hasher.update(participant.as_str().as_bytes());
        hasher.update(tx_id.0);
        Ok(SigningArtifact(hasher.finalize().to_vec()))
    }

    fn finalize(&self, tx: &Transaction) -> dlc_sdk::Result<SerializedTx> {
        let mut bytes = tx.id.0.to_vec();
        for sig in &tx.signatures {
            let artifact = sig.artifact.as_ref().ok_or_else(|| {
                Error::Signer(format!("missing signature from {}", sig.participant_id))
            })?;
            bytes.extend_from_slice(&artifact.0);
        }
        Ok(SerializedTx(bytes))
    }
}

/// Accepts every transaction without sending it anywhere.
#[derive(Debug, Default)]
pub struct SimulatedBroadcaster;

impl BroadcastService for SimulatedBroadcaster {
    fn broadcast(&self, tx: &SerializedTx) -> dlc_sdk::Result<BroadcastAck> {
        let reference = hex::encode(Sha256::digest(&tx.0));
        log::info!("simulated broadcast of {} bytes ({reference})", tx.0.len());
        Ok(BroadcastAck { reference })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(balance: Amount) -> Participant {
        Participant {
            id: ParticipantId::new("1"),
            name: "Alice".into(),
            public_key: "02abc...123".into(),
            balance,
        }
    }

    #[test]
    fn wallet_rejects_overdraw() {
        let wallet = SimulatedWallet::default();
        let err = wallet.select_input(&participant(10), 11).unwrap_err();
        assert!(matches!(err, Error::InputSelection(_)));
    }

    #[test]
    fn wallet_outpoints_are_fresh() {
        let wallet = SimulatedWallet::default();
        let a = wallet.select_input(&participant(100), 50).unwrap();
        let b = wallet.select_input(&participant(100), 50).unwrap();
        assert_ne!(a.txid, b.txid);
        assert_eq!(a.amount, 50);
        assert_eq!(a.witness_utxo.script.len(), 22);
    }

    #[test]
    fn signer_is_deterministic() {
        let tx_id = TxId([3; 32]);
        let who = ParticipantId::new("2");
        assert_eq!(
            SimulatedSigner.sign(&who, &tx_id).unwrap(),
            SimulatedSigner.sign(&who, &tx_id).unwrap()
        );
        assert_ne!(
            SimulatedSigner.sign(&who, &tx_id).unwrap(),
            SimulatedSigner
                .sign(&ParticipantId::new("1"), &tx_id)
                .unwrap()
        );
    }
}
