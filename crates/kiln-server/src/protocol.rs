//! Messages exchanged between client and server.
//!
//! The local-socket transport uses length-prefixed rkyv frames:
//! 4-byte length (u32 LE) + rkyv-encoded message. The loopback HTTP
//! transport carries the same messages as JSON.

use kiln_core::{BuildOptions, BuildResult};
use rkyv::Archive;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ServerError, ServerResult};

/// Largest frame accepted from a peer (100MB).
pub const MAX_FRAME_LEN: usize = 100 * 1024 * 1024;

/// A remote `build(project, options)` call.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct BuildRequest {
    /// Identity of the calling project (its root directory).
    pub project: String,
    pub options: BuildOptions,
}

/// Reply to a [`BuildRequest`].
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub enum BuildResponse {
    /// The build ran; compile errors are inside the result.
    Built(BuildResult),
    /// The request could not be processed.
    Failed { message: String },
}

impl BuildResponse {
    pub fn into_result(self) -> ServerResult<BuildResult> {
        match self {
            BuildResponse::Built(result) => Ok(result),
            BuildResponse::Failed { message } => Err(ServerError::Remote(message)),
        }
    }
}

/// Encode a message as one frame.
pub fn encode_frame(
    message: &impl for<'a> rkyv::Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> ServerResult<Vec<u8>> {
    let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(message)
        .map_err(|e| ServerError::Protocol(format!("Failed to encode message: {}", e)))?;

    let len = u32::try_from(bytes.len())
        .map_err(|_| ServerError::Protocol(format!("Message too large: {} bytes", bytes.len())))?;

    let mut frame = Vec::with_capacity(4 + bytes.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&bytes);
    Ok(frame)
}

/// Decode the body of one frame.
///
/// Frames come from other processes, so the archive is validated before it
/// is deserialized.
pub fn decode_body<T>(bytes: &[u8]) -> ServerResult<T>
where
    T: Archive,
    T::Archived: for<'a> rkyv::bytecheck::CheckBytes<
            rkyv::api::high::HighValidator<'a, rkyv::rancor::Error>,
        > + rkyv::Deserialize<T, rkyv::api::high::HighDeserializer<rkyv::rancor::Error>>,
{
    // Copy into an aligned buffer; frame bodies follow a 4-byte prefix.
    let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
    aligned.extend_from_slice(bytes);

    rkyv::from_bytes::<T, rkyv::rancor::Error>(&aligned)
        .map_err(|e| ServerError::Protocol(format!("Failed to decode message: {}", e)))
}

/// Write one frame to an async stream.
pub async fn write_frame<W>(
    writer: &mut W,
    message: &impl for<'a> rkyv::Serialize<
        rkyv::rancor::Strategy<
            rkyv::ser::Serializer<
                rkyv::util::AlignedVec,
                rkyv::ser::allocator::ArenaHandle<'a>,
                rkyv::ser::sharing::Share,
            >,
            rkyv::rancor::Error,
        >,
    >,
) -> ServerResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(message)?;
    writer
        .write_all(&frame)
        .await
        .map_err(|e| ServerError::Protocol(format!("Failed to write message: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| ServerError::Protocol(format!("Failed to flush stream: {}", e)))?;
    Ok(())
}

/// Read one frame from an async stream.
pub async fn read_frame<R, T>(reader: &mut R) -> ServerResult<T>
where
    R: AsyncRead + Unpin,
    T: Archive,
    T::Archived: for<'a> rkyv::bytecheck::CheckBytes<
            rkyv::api::high::HighValidator<'a, rkyv::rancor::Error>,
        > + rkyv::Deserialize<T, rkyv::api::high::HighDeserializer<rkyv::rancor::Error>>,
{
    let len = reader
        .read_u32_le()
        .await
        .map_err(|e| ServerError::Protocol(format!("Failed to read message length: {}", e)))?
        as usize;

    if len > MAX_FRAME_LEN {
        return Err(ServerError::Protocol(format!(
            "Message too large: {} bytes",
            len
        )));
    }

    let mut bytes = vec![0u8; len];
    reader
        .read_exact(&mut bytes)
        .await
        .map_err(|e| ServerError::Protocol(format!("Failed to read message body: {}", e)))?;

    decode_body(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::{DebugSymbolMode, OutputReuse};

    fn request() -> BuildRequest {
        BuildRequest {
            project: "/projects/game".to_string(),
            options: BuildOptions {
                work_directory: "/projects/game".to_string(),
                assembly_name: "Game".to_string(),
                output: "Library/Game.dll".to_string(),
                defines: vec!["DEBUG".to_string(), "__OWNER_PROCESS_ID__42".to_string()],
                references: vec!["r1.dll".to_string()],
                files: vec!["a.cs".to_string(), "b.cs".to_string()],
                debug_symbols: DebugSymbolMode::Portable,
                output_reuse: OutputReuse::WhenNoChange,
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_request_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = request();

        write_frame(&mut client, &sent).await.unwrap();
        let received: BuildRequest = read_frame(&mut server).await.unwrap();
        assert_eq!(received, sent);
    }

    #[tokio::test]
    async fn test_failed_response_over_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let sent = BuildResponse::Failed {
            message: "unresolved reference: missing.dll".to_string(),
        };

        write_frame(&mut server, &sent).await.unwrap();
        let received: BuildResponse = read_frame(&mut client).await.unwrap();
        let err = received.into_result().unwrap_err();
        assert_eq!(err.to_string(), "unresolved reference: missing.dll");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN as u32) + 1;
        client.write_all(&len.to_le_bytes()).await.unwrap();

        let err = read_frame::<_, BuildRequest>(&mut server).await.unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_garbage_body_rejected() {
        assert!(decode_body::<BuildRequest>(&[0xff; 7]).is_err());
    }

    #[test]
    fn test_json_shape() {
        let response = BuildResponse::Built(BuildResult::success());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["Built"]["succeeded"], true);
    }
}
