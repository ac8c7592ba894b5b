use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::warn;
use wf_config::{HumanDuration, UdfTransport};

use crate::edge::EdgeReceiver;
use crate::error::{CoreError, CoreReason};
use crate::message::Message;
use crate::node::NodeOutputs;
use crate::udf::protocol::{UdfRequest, UdfResponse};

/// Writes one length-prefixed JSON frame: a 4-byte little-endian length
/// followed by the payload (spec.md §6 wire format).
async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, req: &UdfRequest) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(req)?;
    w.write_all(&(payload.len() as u32).to_le_bytes()).await?;
    w.write_all(&payload).await?;
    w.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<UdfResponse> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf) as usize;
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// The transport a UDF process is reached over (spec.md §4.9 C9, §6): a
/// spawned subprocess talking over its stdio pipes, or a pre-existing Unix
/// domain socket.
enum Transport {
    Process {
        child: Child,
        stdin: ChildStdin,
        stdout: ChildStdout,
    },
    Socket(UnixStream),
}

impl Transport {
    async fn connect(config: &UdfTransport) -> anyhow::Result<Self> {
        match config {
            UdfTransport::Process { path, args } => {
                let mut child = Command::new(path)
                    .args(args)
                    .stdin(std::process::Stdio::piped())
                    .stdout(std::process::Stdio::piped())
                    .kill_on_drop(true)
                    .spawn()?;
                let stdin = child.stdin.take().expect("piped stdin");
                let stdout = child.stdout.take().expect("piped stdout");
                Ok(Transport::Process { child, stdin, stdout })
            }
            UdfTransport::Socket { path } => Ok(Transport::Socket(UnixStream::connect(path).await?)),
        }
    }

    async fn send(&mut self, req: &UdfRequest) -> anyhow::Result<()> {
        match self {
            Transport::Process { stdin, .. } => write_frame(stdin, req).await,
            Transport::Socket(s) => write_frame(s, req).await,
        }
    }

    async fn recv(&mut self) -> anyhow::Result<UdfResponse> {
        match self {
            Transport::Process { stdout, .. } => read_frame(stdout).await,
            Transport::Socket(s) => read_frame(s).await,
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        if let Transport::Process { child, .. } = self {
            let _ = child.start_kill();
        }
    }
}

/// Hands each point to an out-of-process UDF and forwards whatever it
/// returns (spec.md §4.9 C9 UDF bridge).
pub struct UdfBridge {
    pub transport: UdfTransport,
    pub timeout: HumanDuration,
    pub options: serde_json::Value,
}

impl UdfBridge {
    pub async fn run(self, mut input: EdgeReceiver, outputs: NodeOutputs) -> Result<(), CoreError> {
        let mut transport = Transport::connect(&self.transport)
            .await
            .map_err(|_| CoreError::from(CoreReason::UdfBridge))?;

        transport
            .send(&UdfRequest::Init { options: self.options.clone() })
            .await
            .map_err(|_| CoreError::from(CoreReason::UdfBridge))?;
        match transport.recv().await {
            Ok(UdfResponse::InitAck) => {}
            other => {
                warn!(?other, "udf init did not ack");
            }
        }

        while let Some(msg) = input.recv().await {
            let group = msg.group().clone();
            let request = match &msg {
                Message::Point(_, point) => UdfRequest::Point { point: point.clone() },
                Message::Batch(_, points) => UdfRequest::Batch { points: points.clone() },
                Message::Barrier(..) | Message::DeleteGroup(..) => {
                    outputs.fan_out(msg).await?;
                    continue;
                }
            };

            let call = async {
                transport.send(&request).await?;
                transport.recv().await
            };

            match tokio::time::timeout(self.timeout.as_duration(), call).await {
                Ok(Ok(UdfResponse::Point { point })) => {
                    outputs.fan_out(Message::Point(group, point)).await?;
                }
                Ok(Ok(UdfResponse::Batch { points })) => {
                    outputs.fan_out(Message::Batch(group, points)).await?;
                }
                Ok(Ok(UdfResponse::Error { message })) => {
                    warn!(%message, "udf returned an error");
                }
                Ok(Ok(other)) => warn!(?other, "unexpected udf response"),
                Ok(Err(e)) => {
                    warn!(error = %e, "udf transport error");
                    return Err(CoreError::from(CoreReason::UdfBridge));
                }
                Err(_) => warn!("udf call timed out"),
            }
        }
        Ok(())
    }
}
