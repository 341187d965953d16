//! Wire frame codec.
//!
//! ```text
//! +-------------+---------------------------------------------------+
//! | destination | encrypted segment (N * 16 bytes)                  |
//! | 2B plain    | marker 1B | sender 2B | payload | zero padding     |
//! +-------------+---------------------------------------------------+
//! ```
//!
//! Every address is written high byte first. The destination stays in clear
//! so receivers can drop foreign frames before paying for a decryption.
use crate::cipher::{blocks_for, BlockCipher, CipherError, BLOCK_SIZE};
use crate::LoRaAddress;

/// Plain destination header length.
pub const HEADER_SIZE: usize = 2;
/// Marker and sender address, ahead of the payload in the encrypted segment.
pub const SEGMENT_PREFIX: usize = 3;
/// Largest packet the transceiver carries.
pub const MAX_LORA_PAYLOAD: usize = 255;
/// Largest frame: the header plus as many whole blocks as fit in one packet.
pub const MAX_FRAME_LENGTH: usize =
    HEADER_SIZE + ((MAX_LORA_PAYLOAD - HEADER_SIZE) / BLOCK_SIZE) * BLOCK_SIZE;
/// Largest payload a single frame can hold.
pub const MAX_PAYLOAD: usize = MAX_FRAME_LENGTH - HEADER_SIZE - SEGMENT_PREFIX;

/// Trait to calculate the encoded size of a frame component.
pub trait FrameSize {
    /// Encoded size in bytes.
    fn size(&self) -> usize;
}

/// Decoded (plaintext) view of a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Full destination address (sub-address 0 means broadcast).
    pub destination: LoRaAddress,
    /// Random per-frame byte, for caller-side correlation only.
    pub marker: u8,
    /// Full sender address.
    pub sender: LoRaAddress,
    /// Payload as carried by the segment. After decoding it includes the
    /// zero padding up to the block boundary.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Builds a frame with a fresh random marker.
    pub fn new(destination: LoRaAddress, sender: LoRaAddress, payload: &[u8]) -> Self {
        Self::with_marker(destination, sender, rand::random(), payload)
    }

    pub fn with_marker(
        destination: LoRaAddress,
        sender: LoRaAddress,
        marker: u8,
        payload: &[u8],
    ) -> Self {
        Frame {
            destination,
            marker,
            sender,
            payload: payload.to_vec(),
        }
    }

    /// Length of the encrypted segment for a payload of `payload_len` bytes.
    pub fn segment_len(payload_len: usize) -> usize {
        blocks_for(payload_len + SEGMENT_PREFIX) * BLOCK_SIZE
    }

    /// Encodes and encrypts the frame. The destination header is never
    /// encrypted; padding bytes are zero before encryption.
    pub fn to_bytes<C: BlockCipher>(&self, cipher: &C) -> Result<Vec<u8>, FrameError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(FrameError::TooBigPayload {
                size: self.payload.len(),
            });
        }
        let mut bytes = vec![0u8; self.size()];
        bytes[..HEADER_SIZE].copy_from_slice(&self.destination.to_be_bytes());
        let segment = &mut bytes[HEADER_SIZE..];
        segment[0] = self.marker;
        segment[1..SEGMENT_PREFIX].copy_from_slice(&self.sender.to_be_bytes());
        segment[SEGMENT_PREFIX..SEGMENT_PREFIX + self.payload.len()].copy_from_slice(&self.payload);
        cipher.encrypt_blocks(segment)?;
        Ok(bytes)
    }

    /// Decrypts and parses a raw frame.
    ///
    /// The payload length is derived from the transport length (`len - 5`),
    /// there is no length field or terminator on the wire.
    pub fn try_from_bytes<C: BlockCipher>(bytes: &[u8], cipher: &C) -> Result<Self, FrameError> {
        let destination = Self::destination_of(bytes)?;
        let encrypted = &bytes[HEADER_SIZE..];
        if encrypted.len() < BLOCK_SIZE {
            return Err(FrameError::InvalidHeader {
                context: format!("Frame too small ({} bytes), missing encrypted segment!", bytes.len()),
            });
        }
        if encrypted.len() % BLOCK_SIZE != 0 {
            return Err(FrameError::InvalidHeader {
                context: format!(
                    "Encrypted segment is not block aligned ({} bytes).",
                    encrypted.len()
                ),
            });
        }
        let mut segment = encrypted.to_vec();
        cipher.decrypt_blocks(&mut segment)?;
        let mut sender_raw = [0u8; 2];
        sender_raw.copy_from_slice(&segment[1..SEGMENT_PREFIX]);
        Ok(Frame {
            destination,
            marker: segment[0],
            sender: u16::from_be_bytes(sender_raw),
            payload: segment.split_off(SEGMENT_PREFIX),
        })
    }

    /// Reads the clear destination header without decrypting anything.
    pub fn destination_of(bytes: &[u8]) -> Result<LoRaAddress, FrameError> {
        if bytes.len() < HEADER_SIZE {
            return Err(FrameError::InvalidHeader {
                context: format!("Destination header is too small ({} bytes).", bytes.len()),
            });
        }
        let mut raw = [0u8; 2];
        raw.copy_from_slice(&bytes[..HEADER_SIZE]);
        Ok(u16::from_be_bytes(raw))
    }
}

impl FrameSize for Frame {
    fn size(&self) -> usize {
        HEADER_SIZE + Frame::segment_len(self.payload.len())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Invalid header. Context: {}", .context)]
    InvalidHeader { context: String },

    #[error("Payload is too big to fit in one frame (is: {}B, max: {}B)!", .size, MAX_PAYLOAD)]
    TooBigPayload { size: usize },

    #[error("Cipher error.")]
    CipherError(#[from] CipherError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::Aes256Cipher;

    #[test]
    fn two_byte_payload_makes_eighteen_byte_frame() {
        let cipher = Aes256Cipher::from_seed(4321);
        let frame = Frame::with_marker(0x0925, 0x0921, 0x5A, b"hi");
        assert_eq!(Frame::segment_len(2), 16);
        assert_eq!(frame.size(), 18);
        let bytes = frame.to_bytes(&cipher).unwrap();
        assert_eq!(bytes.len(), 18);
        assert_eq!(&bytes[..2], &[0x09, 0x25]);
    }

    #[test]
    fn segment_grows_by_whole_blocks() {
        assert_eq!(Frame::segment_len(0), 16);
        assert_eq!(Frame::segment_len(13), 16);
        assert_eq!(Frame::segment_len(14), 32);
        assert_eq!(Frame::segment_len(MAX_PAYLOAD), 240);
        assert_eq!(MAX_FRAME_LENGTH, 242);
    }

    #[test]
    fn decode_restores_marker_sender_and_padded_payload() {
        let cipher = Aes256Cipher::from_seed(99);
        let frame = Frame::new(163, 161, b"hello");
        let bytes = frame.to_bytes(&cipher).unwrap();
        let decoded = Frame::try_from_bytes(&bytes, &cipher).unwrap();
        assert_eq!(decoded.destination, 163);
        assert_eq!(decoded.sender, 161);
        assert_eq!(decoded.marker, frame.marker);
        assert_eq!(decoded.payload.len(), bytes.len() - 5);
        assert_eq!(&decoded.payload[..5], b"hello");
        assert!(decoded.payload[5..].iter().all(|b| *b == 0));
    }

    #[test]
    fn every_payload_length_decodes() {
        let cipher = Aes256Cipher::from_seed(4321);
        for len in 0..=MAX_PAYLOAD {
            let payload: Vec<u8> = (0..len).map(|i| (i % 251) as u8 + 1).collect();
            let frame = Frame::with_marker(0x0925, 0x0921, len as u8, &payload);
            let bytes = frame.to_bytes(&cipher).unwrap();
            assert_eq!((bytes.len() - HEADER_SIZE) % BLOCK_SIZE, 0, "len {}", len);

            let decoded = Frame::try_from_bytes(&bytes, &cipher).unwrap();
            assert_eq!(decoded.destination, 0x0925);
            assert_eq!(decoded.sender, 0x0921, "len {}", len);
            assert_eq!(decoded.marker, len as u8);
            assert_eq!(decoded.payload.len(), bytes.len() - 5);
            assert_eq!(&decoded.payload[..len], &payload[..], "len {}", len);
            assert!(decoded.payload[len..].iter().all(|b| *b == 0));
        }
    }

    #[test]
    fn block_filling_payload_decodes_exactly() {
        let cipher = Aes256Cipher::from_seed(5);
        let payload: Vec<u8> = (1u8..=29).collect();
        let frame = Frame::with_marker(1, 2, 3, &payload);
        let decoded = Frame::try_from_bytes(&frame.to_bytes(&cipher).unwrap(), &cipher).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn destination_is_sent_in_clear() {
        let cipher = Aes256Cipher::from_seed(1);
        let bytes = Frame::new(0xBEEF, 0x0001, b"x").to_bytes(&cipher).unwrap();
        assert_eq!(Frame::destination_of(&bytes), Ok(0xBEEF));
    }

    #[test]
    fn wrong_key_scrambles_sender() {
        let frame = Frame::with_marker(0x0925, 0x0921, 7, b"secret");
        let bytes = frame.to_bytes(&Aes256Cipher::from_seed(4321)).unwrap();
        let decoded = Frame::try_from_bytes(&bytes, &Aes256Cipher::from_seed(1234)).unwrap();
        assert_eq!(decoded.destination, 0x0925);
        assert_ne!(decoded.sender, 0x0921);
    }

    #[test]
    fn truncated_or_misaligned_frames_are_rejected() {
        let cipher = Aes256Cipher::from_seed(1);
        assert!(matches!(
            Frame::try_from_bytes(&[0x01], &cipher),
            Err(FrameError::InvalidHeader { .. })
        ));
        assert!(matches!(
            Frame::try_from_bytes(&[0u8; 10], &cipher),
            Err(FrameError::InvalidHeader { .. })
        ));
        assert!(matches!(
            Frame::try_from_bytes(&[0u8; 20], &cipher),
            Err(FrameError::InvalidHeader { .. })
        ));
    }

    #[test]
    fn oversized_payload_is_refused() {
        let cipher = Aes256Cipher::from_seed(1);
        let frame = Frame::new(1, 2, &[0u8; MAX_PAYLOAD + 1]);
        assert_eq!(
            frame.to_bytes(&cipher),
            Err(FrameError::TooBigPayload { size: MAX_PAYLOAD + 1 })
        );
    }
}
