//! Command-style probes: database query, cache ping, shell command

use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

use readyup_core::model::{CommandProbe, HealthCheckSpec, Outcome, Reason};
use readyup_core::probe::Prober;

use super::errors::{classify_io, classify_stderr, short};
use super::tcp;

const PING: &[u8] = b"*1\r\n$4\r\nPING\r\n";

async fn run(cmd: &mut Command, program: &str) -> Result<Output, Outcome> {
    cmd.kill_on_drop(true).stdin(std::process::Stdio::null());
    cmd.output().await.map_err(|e| {
        let detail = if e.kind() == std::io::ErrorKind::NotFound {
            format!("{} not found on PATH", program)
        } else {
            format!("cannot run {}: {}", program, short(&e))
        };
        Outcome::unhealthy(Reason::Unknown, detail)
    })
}

fn first_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or_default()
        .to_string()
}

/// `SELECT 1` through `psql`; healthy when the reply is `1`
pub struct DatabaseQueryProber {
    program: PathBuf,
}

impl DatabaseQueryProber {
    pub fn new() -> Self {
        Self::with_program("psql")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DatabaseQueryProber {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Prober for DatabaseQueryProber {
    async fn probe(&self, spec: &HealthCheckSpec, timeout: Duration) -> Outcome {
        let HealthCheckSpec::Command { target, .. } = spec else {
            return Outcome::unhealthy(Reason::Unknown, "query checker got a non-command spec");
        };

        let program = self.program.display().to_string();
        let mut cmd = Command::new(&self.program);
        cmd.arg(target)
            .args(["--no-psqlrc", "-tAc", "SELECT 1"])
            .env("PGCONNECT_TIMEOUT", timeout.as_secs().max(1).to_string());
        let output = match run(&mut cmd, &program).await {
            Ok(o) => o,
            Err(outcome) => return outcome,
        };

        if output.status.success() {
            let reply = first_line(&output.stdout);
            if reply == "1" {
                Outcome::Healthy
            } else {
                Outcome::unhealthy(Reason::ProtocolError, format!("unexpected reply '{}'", reply))
            }
        } else {
            let stderr = first_line(&output.stderr);
            Outcome::unhealthy(classify_stderr(&String::from_utf8_lossy(&output.stderr)), stderr)
        }
    }

    fn name(&self) -> &'static str {
        "database-query"
    }
}

/// RESP `PING` to `host:port`; healthy on `+PONG`
pub struct CachePingProber;

impl CachePingProber {
    async fn ping(host: &str, port: u16) -> Outcome {
        let mut stream = match tcp::connect(host, port).await {
            Ok(s) => s,
            Err(outcome) => return outcome,
        };
        if let Err(e) = stream.write_all(PING).await {
            return Outcome::unhealthy(classify_io(&e), short(&e));
        }

        let mut reply = Vec::with_capacity(64);
        let mut chunk = [0u8; 256];
        while !reply.contains(&b'\n') && reply.len() < 4096 {
            match stream.read(&mut chunk).await {
                Ok(0) => break,
                Ok(n) => reply.extend_from_slice(&chunk[..n]),
                Err(e) => return Outcome::unhealthy(classify_io(&e), short(&e)),
            }
        }

        let line = first_line(&reply);
        match line.as_str() {
            "+PONG" => Outcome::Healthy,
            "" => Outcome::unhealthy(Reason::ConnectionReset, "connection closed before PONG"),
            // -NOAUTH, -LOADING, -ERR ...
            other => Outcome::unhealthy(Reason::ProtocolError, format!("unexpected reply '{}'", other)),
        }
    }
}

#[async_trait]
impl Prober for CachePingProber {
    async fn probe(&self, spec: &HealthCheckSpec, timeout: Duration) -> Outcome {
        let HealthCheckSpec::Command { target, .. } = spec else {
            return Outcome::unhealthy(Reason::Unknown, "ping checker got a non-command spec");
        };
        let Some((host, port)) = target
            .rsplit_once(':')
            .and_then(|(h, p)| p.parse::<u16>().ok().map(|p| (h.trim_matches(['[', ']']), p)))
        else {
            return Outcome::unhealthy(Reason::ProtocolError, format!("bad cache target '{}'", target));
        };

        match tokio::time::timeout(timeout, Self::ping(host, port)).await {
            Ok(outcome) => outcome,
            Err(_) => Outcome::unhealthy(Reason::Timeout, format!("no PONG within {:?}", timeout)),
        }
    }

    fn name(&self) -> &'static str {
        "cache-ping"
    }
}

/// `sh -c <target>`; exit status 0 is healthy
pub struct ExecProber;

#[async_trait]
impl Prober for ExecProber {
    async fn probe(&self, spec: &HealthCheckSpec, _timeout: Duration) -> Outcome {
        let HealthCheckSpec::Command {
            probe: CommandProbe::Exec,
            target,
        } = spec
        else {
            return Outcome::unhealthy(Reason::Unknown, "exec checker got a non-exec spec");
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(target);
        let output = match run(&mut cmd, "sh").await {
            Ok(o) => o,
            Err(outcome) => return outcome,
        };
        if output.status.success() {
            return Outcome::Healthy;
        }

        let code = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".into());
        let stderr = first_line(&output.stderr);
        let detail = if stderr.is_empty() {
            format!("exit code {}", code)
        } else {
            format!("exit code {}: {}", code, stderr)
        };
        Outcome::unhealthy(Reason::ProtocolError, detail)
    }

    fn name(&self) -> &'static str {
        "exec"
    }
}
