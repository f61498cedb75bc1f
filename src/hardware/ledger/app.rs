//! Ledger Ethereum app
//!
//! Maps the vendor-neutral session operations onto Ethereum app APDUs.

use super::apdu::{chunk_payload, ApduClass, ApduCommand, ApduInstruction, ApduResponse};
use super::transport::{ApduConnector, ApduExchange};
use crate::core::errors::HardwareError;
use crate::hardware::classify::Fault;
use crate::hardware::eip712::TypedData;
use crate::hardware::path::DerivationPath;
use crate::hardware::signature::{parse_signature_components, SignatureComponents};
use crate::hardware::transaction::Transaction;
use crate::hardware::{AppConfig, DeviceInfo, DeviceProvider, DeviceSession, FaultResult, Vendor};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Arbitrary contract data (blind signing) allowed
const FLAG_ARBITRARY_DATA: u8 = 0x01;

fn malformed(what: &str) -> Fault {
    Fault::Classified(HardwareError::transport(format!("Malformed {} response", what)))
}

/// `(public_key, address)` from a GET_ETH_PUBLIC_ADDRESS response:
/// `pubkey_len, pubkey, addr_len, ascii_hex_address`.
pub fn parse_address_response(data: &[u8]) -> FaultResult<(Vec<u8>, String)> {
    let pub_key_len = *data.first().ok_or_else(|| malformed("address"))? as usize;
    let pub_key = data
        .get(1..1 + pub_key_len)
        .ok_or_else(|| malformed("address"))?
        .to_vec();

    let offset = 1 + pub_key_len;
    let addr_len = *data.get(offset).ok_or_else(|| malformed("address"))? as usize;
    let ascii = data
        .get(offset + 1..offset + 1 + addr_len)
        .ok_or_else(|| malformed("address"))?;
    let text = std::str::from_utf8(ascii).map_err(|_| malformed("address"))?;
    let digits = text.strip_prefix("0x").unwrap_or(text);
    if digits.len() != 40 || !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(malformed("address"));
    }

    Ok((pub_key, format!("0x{}", digits.to_ascii_lowercase())))
}

/// `(v, r, s)` from a signing response.
pub fn parse_signature_response(data: &[u8]) -> FaultResult<(u8, [u8; 32], [u8; 32])> {
    if data.len() < 65 {
        return Err(malformed("signature"));
    }
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&data[1..33]);
    s.copy_from_slice(&data[33..65]);
    Ok((data[0], r, s))
}

/// `flags, major, minor, patch`
pub fn parse_app_configuration(data: &[u8]) -> FaultResult<AppConfig> {
    if data.len() < 4 {
        return Err(malformed("app configuration"));
    }
    Ok(AppConfig {
        name: "Ethereum".to_string(),
        version: format!("{}.{}.{}", data[1], data[2], data[3]),
        arbitrary_data_enabled: data[0] & FLAG_ARBITRARY_DATA != 0,
    })
}

/// Full recovery value for a legacy transaction.
///
/// The device reports `chainId*2+35+parity` truncated to one byte, so for
/// large chain ids the parity is recovered from the low byte.
pub fn legacy_recovery_value(chain_id: u64, v_byte: u8) -> u64 {
    if chain_id == 0 {
        return v_byte as u64;
    }
    let base = chain_id.wrapping_mul(2).wrapping_add(35);
    if base < 0xff {
        return v_byte as u64;
    }
    let parity = (v_byte.wrapping_sub((base & 0xff) as u8) & 1) as u64;
    base + parity
}

pub struct LedgerSession {
    transport: Box<dyn ApduExchange>,
    info: DeviceInfo,
}

impl LedgerSession {
    pub fn new(transport: Box<dyn ApduExchange>) -> Self {
        let model = transport
            .product_name()
            .unwrap_or_else(|| "Ledger".to_string());
        Self {
            transport,
            info: DeviceInfo {
                vendor: Vendor::Ledger,
                model,
                firmware_version: None,
                label: None,
            },
        }
    }

    async fn exchange(&mut self, command: &ApduCommand) -> FaultResult<Vec<u8>> {
        let raw = self.transport.exchange(&command.to_bytes()?).await?;
        let response = ApduResponse::from_bytes(&raw)?;
        if !response.is_success() {
            warn!(
                "APDU INS={:02X} failed: {:04X} - {}",
                command.ins,
                response.status_code(),
                response.error_description()
            );
        }
        response.into_result()
    }

    /// Sends every chunk, returning the last response payload.
    async fn exchange_chunked(&mut self, commands: Vec<ApduCommand>) -> FaultResult<Vec<u8>> {
        let total = commands.len();
        let mut last = Vec::new();
        for (i, command) in commands.iter().enumerate() {
            debug!("Sending chunk {}/{}", i + 1, total);
            last = self.exchange(command).await?;
        }
        Ok(last)
    }

    async fn sign_with(
        &mut self,
        ins: ApduInstruction,
        payload: Vec<u8>,
    ) -> FaultResult<(u8, [u8; 32], [u8; 32])> {
        let data = self.exchange_chunked(chunk_payload(ins, 0x00, &payload)).await?;
        parse_signature_response(&data)
    }
}

#[async_trait]
impl DeviceSession for LedgerSession {
    fn vendor(&self) -> Vendor {
        Vendor::Ledger
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    async fn app_config(&mut self) -> FaultResult<AppConfig> {
        let command = ApduCommand::new(
            ApduClass::Standard,
            ApduInstruction::GetAppConfiguration,
            0x00,
            0x00,
            Vec::new(),
        );
        let data = self.exchange(&command).await?;
        let config = parse_app_configuration(&data)?;
        self.info.firmware_version = Some(config.version.clone());
        Ok(config)
    }

    async fn get_address(&mut self, path: &DerivationPath, display: bool) -> FaultResult<String> {
        info!("Fetching Ethereum address for {}", path);
        let p1 = if display { 0x01 } else { 0x00 };
        let command = ApduCommand::new(
            ApduClass::Standard,
            ApduInstruction::GetEthPublicAddress,
            p1,
            0x00,
            path.to_bytes()?,
        );
        let data = self.exchange(&command).await?;
        let (pub_key, address) = parse_address_response(&data)?;
        debug!("Public key length: {}, address: {}", pub_key.len(), address);
        Ok(address)
    }

    async fn sign_personal_message(
        &mut self,
        path: &DerivationPath,
        message: &[u8],
    ) -> FaultResult<SignatureComponents> {
        info!("Ledger signing personal message ({} bytes) at {}", message.len(), path);
        let mut payload = path.to_bytes()?;
        payload.extend_from_slice(&(message.len() as u32).to_be_bytes());
        payload.extend_from_slice(message);

        let (v, r, s) = self.sign_with(ApduInstruction::SignPersonalMessage, payload).await?;
        Ok(parse_signature_components(r, s, v as u64))
    }

    async fn sign_transaction(
        &mut self,
        path: &DerivationPath,
        transaction: &Transaction,
    ) -> FaultResult<SignatureComponents> {
        info!(
            "Ledger signing transaction on chain {} at {}",
            transaction.chain_id(),
            path
        );
        let mut payload = path.to_bytes()?;
        payload.extend_from_slice(&transaction.unsigned_payload());

        let (v_byte, r, s) = self.sign_with(ApduInstruction::SignTransaction, payload).await?;
        let v = if transaction.is_typed() {
            // typed transactions report yParity
            (v_byte & 1) as u64
        } else {
            legacy_recovery_value(transaction.chain_id(), v_byte)
        };
        Ok(parse_signature_components(r, s, v))
    }

    async fn sign_typed_data(
        &mut self,
        path: &DerivationPath,
        typed_data: &TypedData,
    ) -> FaultResult<SignatureComponents> {
        info!("Ledger signing EIP-712 hashes at {}", path);
        let domain_separator = typed_data.domain_separator()?;
        let message_hash = typed_data.message_hash()?.ok_or_else(|| {
            HardwareError::unsupported("Ledger cannot sign typed data whose primary type is the domain")
        })?;

        let mut payload = path.to_bytes()?;
        payload.extend_from_slice(&domain_separator);
        payload.extend_from_slice(&message_hash);

        let command = ApduCommand::new(
            ApduClass::Standard,
            ApduInstruction::SignEip712Hashed,
            0x00,
            0x00,
            payload,
        );
        let data = self.exchange(&command).await?;
        let (v, r, s) = parse_signature_response(&data)?;
        Ok(parse_signature_components(r, s, v as u64))
    }

    async fn close(&mut self) -> FaultResult<()> {
        self.transport.close().await
    }
}

/// Opens [`LedgerSession`]s through an [`ApduConnector`].
pub struct LedgerProvider {
    connector: Arc<dyn ApduConnector>,
}

impl LedgerProvider {
    pub fn new(connector: Arc<dyn ApduConnector>) -> Self {
        Self { connector }
    }
}

#[async_trait]
impl DeviceProvider for LedgerProvider {
    fn vendor(&self) -> Vendor {
        Vendor::Ledger
    }

    async fn open(&self) -> FaultResult<Box<dyn DeviceSession>> {
        let transport = self.connector.open().await?;
        Ok(Box::new(LedgerSession::new(transport)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::HardwareErrorKind;
    use crate::hardware::classify::classify_apdu_fault;

    fn address_response(addr: &str) -> Vec<u8> {
        let mut data = vec![65];
        data.extend_from_slice(&[0x04; 65]);
        data.push(addr.len() as u8);
        data.extend_from_slice(addr.as_bytes());
        data
    }

    #[test]
    fn test_parse_address_response() {
        let (pk, addr) =
            parse_address_response(&address_response("CD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826")).unwrap();
        assert_eq!(pk.len(), 65);
        assert_eq!(addr, "0xcd2a3d9f938e13cd947ec05abc7fe734df8dd826");
    }

    #[test]
    fn test_truncated_address_response() {
        let mut data = address_response("CD2a3d9F938E13CD947Ec05AbC7FE734Df8DD826");
        data.truncate(80);
        let err = classify_apdu_fault(parse_address_response(&data).unwrap_err());
        assert_eq!(err.kind(), HardwareErrorKind::Transport);
    }

    #[test]
    fn test_parse_signature_response() {
        let mut data = vec![0x26];
        data.extend_from_slice(&[0x11; 32]);
        data.extend_from_slice(&[0x22; 32]);
        let (v, r, s) = parse_signature_response(&data).unwrap();
        assert_eq!(v, 0x26);
        assert_eq!(r, [0x11; 32]);
        assert_eq!(s, [0x22; 32]);
        assert!(parse_signature_response(&data[..64]).is_err());
    }

    #[test]
    fn test_parse_app_configuration() {
        let config = parse_app_configuration(&[0x01, 1, 10, 3]).unwrap();
        assert_eq!(config.version, "1.10.3");
        assert!(config.arbitrary_data_enabled);
        assert!(!parse_app_configuration(&[0x00, 1, 0, 0]).unwrap().arbitrary_data_enabled);
    }

    #[test]
    fn test_legacy_recovery_value() {
        // chain 1: v fits a byte
        assert_eq!(legacy_recovery_value(1, 37), 37);
        assert_eq!(legacy_recovery_value(1, 38), 38);
        // chain 137: 309/310 truncated to 0x35/0x36
        assert_eq!(legacy_recovery_value(137, 0x35), 309);
        assert_eq!(legacy_recovery_value(137, 0x36), 310);
        // pre-EIP-155
        assert_eq!(legacy_recovery_value(0, 27), 27);
    }
}
