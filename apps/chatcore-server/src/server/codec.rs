use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

const LENGTH_PREFIX_BYTES: usize = 4;
const NONCE_BYTES: usize = 12;

/// The AES-256-GCM key shared out-of-band with every client. See
/// SPEC_FULL.md §9 decision 4: configured, never hardcoded.
#[derive(Clone)]
pub(crate) struct FrameKey(Key<Aes256Gcm>);

impl FrameKey {
    #[must_use]
    pub(crate) fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(Key::<Aes256Gcm>::from(bytes))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(&self.0)
    }
}

/// A hard connection error: a short read on the length header or body, or
/// the peer closing the socket. Never recoverable per-request — see
/// SPEC_FULL.md §9 decision 2.
#[derive(Debug, thiserror::Error)]
pub(crate) enum FrameReadError {
    #[error("connection closed")]
    Closed,
    #[error("frame exceeds maximum size")]
    TooLarge,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A per-request condition that never warrants closing the connection: a
/// declared length of zero, or ciphertext that failed to authenticate.
/// Kept open per §4.1.
#[derive(Debug, thiserror::Error)]
#[error("invalid request format")]
pub(crate) struct FrameDecryptError;

pub(crate) struct FrameReader {
    key: FrameKey,
    read_half: OwnedReadHalf,
    max_frame_bytes: usize,
}

impl FrameReader {
    pub(crate) fn new(key: FrameKey, read_half: OwnedReadHalf, max_frame_bytes: usize) -> Self {
        Self { key, read_half, max_frame_bytes }
    }

    /// Reads one frame and returns its decrypted plaintext, or
    /// `Ok(Err(_))` if the ciphertext failed to authenticate (a
    /// recoverable per-request condition), or `Err(_)` on a short
    /// read / closed connection (a hard connection error).
    pub(crate) async fn read_frame(&mut self) -> Result<Result<Vec<u8>, FrameDecryptError>, FrameReadError> {
        let mut length_bytes = [0_u8; LENGTH_PREFIX_BYTES];
        match self.read_half.read_exact(&mut length_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FrameReadError::Closed),
            Err(e) => return Err(e.into()),
        }
        let length = u32::from_be_bytes(length_bytes) as usize;
        if length == 0 {
            return Ok(Err(FrameDecryptError));
        }
        if length > self.max_frame_bytes {
            return Err(FrameReadError::TooLarge);
        }

        let mut ciphertext = vec![0_u8; length];
        self.read_half.read_exact(&mut ciphertext).await?;

        if ciphertext.len() < NONCE_BYTES {
            return Ok(Err(FrameDecryptError));
        }
        let (nonce_bytes, body) = ciphertext.split_at(NONCE_BYTES);
        let nonce = Nonce::from_slice(nonce_bytes);
        match self.key.cipher().decrypt(nonce, body) {
            Ok(plaintext) => Ok(Ok(plaintext)),
            Err(_) => Ok(Err(FrameDecryptError)),
        }
    }
}

/// Shared writer half, guarded by a mutex so handler pushes never tear a
/// frame written concurrently with the per-connection response (§4.1, §5).
pub(crate) struct FrameWriter {
    key: FrameKey,
    write_half: Mutex<OwnedWriteHalf>,
}

impl FrameWriter {
    pub(crate) fn new(key: FrameKey, write_half: OwnedWriteHalf) -> Self {
        Self { key, write_half: Mutex::new(write_half) }
    }

    pub(crate) async fn write_frame(&self, plaintext: &[u8]) -> std::io::Result<()> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .key
            .cipher()
            .encrypt(&nonce, plaintext)
            .map_err(|_| std::io::Error::other("frame encryption failed"))?;

        let mut framed = Vec::with_capacity(NONCE_BYTES + ciphertext.len());
        framed.extend_from_slice(nonce.as_slice());
        framed.extend_from_slice(&ciphertext);

        let length = u32::try_from(framed.len()).map_err(|_| std::io::Error::other("frame too large"))?;

        let mut write_half = self.write_half.lock().await;
        write_half.write_all(&length.to_be_bytes()).await?;
        write_half.write_all(&framed).await?;
        write_half.flush().await
    }

    pub(crate) async fn write_json<T: serde::Serialize>(&self, value: &T) -> std::io::Result<()> {
        let bytes = serde_json::to_vec(value).map_err(std::io::Error::other)?;
        self.write_frame(&bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameKey, FrameReader, NONCE_BYTES};
    use aes_gcm::aead::{Aead, KeyInit, OsRng};
    use aes_gcm::{AeadCore, Aes256Gcm};
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};

    #[test]
    fn round_trips_through_encrypt_decrypt() {
        let key = FrameKey::from_bytes([7_u8; 32]);
        let cipher = key.cipher();
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher.encrypt(&nonce, b"hello".as_slice()).unwrap();
        let plaintext = cipher.decrypt(&nonce, ciphertext.as_slice()).unwrap();
        assert_eq!(plaintext, b"hello");
        assert_eq!(nonce.len(), NONCE_BYTES);
    }

    #[tokio::test]
    async fn zero_length_frame_is_recoverable_not_a_hard_close() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&0_u32.to_be_bytes()).await.unwrap();
        });
        let (read_half, _write_half) = listener.accept().await.unwrap().0.into_split();
        let mut reader = FrameReader::new(FrameKey::from_bytes([7_u8; 32]), read_half, 1024);

        let result = reader.read_frame().await.expect("zero length must not be a hard connection error");
        assert!(result.is_err(), "zero length must decode as a recoverable FrameDecryptError");
        client.await.unwrap();
    }
}
