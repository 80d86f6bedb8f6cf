//! NirSoft `svcl.exe` backend

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{AudioSession, AudioSessions, DeviceTarget, SessionError, SessionSnapshot, SessionState};

const TOOL_TIMEOUT: Duration = Duration::from_secs(10);

const COLUMNS: &str = "Name,Type,Direction,Default,Process Path,Command-Line Friendly ID";

/// One row of `svcl /scomma` output
#[derive(Debug, Deserialize)]
struct Row {
    #[serde(rename = "Type", default)]
    kind: String,
    #[serde(rename = "Direction", default)]
    direction: String,
    #[serde(rename = "Default", default)]
    default: String,
    #[serde(rename = "Process Path", default)]
    process_path: String,
    #[serde(rename = "Command-Line Friendly ID", default)]
    friendly_id: String,
}

pub struct Svcl {
    path: PathBuf,
}

impl Svcl {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn run(&self, args: &[&str]) -> Result<Output, SessionError> {
        if !self.path.exists() {
            return Err(SessionError::ToolMissing(self.path.clone()));
        }
        let mut command = Command::new(&self.path);
        command.args(args).kill_on_drop(true);
        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }
        trace!("svcl {:?}", args);
        tokio::time::timeout(TOOL_TIMEOUT, command.output())
            .await
            .map_err(|_| SessionError::Timeout(TOOL_TIMEOUT.as_secs()))?
            .map_err(SessionError::from)
    }
}

/// Device part of a friendly id (`Vendor\Device\Name\Render[\app.exe]`)
fn device_of(friendly_id: &str) -> Option<String> {
    let id = friendly_id.trim();
    let end = id.to_ascii_lowercase().find("\\render")? + "\\render".len();
    Some(id[..end].to_string())
}

fn process_name(path: &str) -> Option<String> {
    let name = path.trim().rsplit(['\\', '/']).next()?.trim();
    (!name.is_empty()).then(|| name.to_lowercase())
}

/// Parse a `/scomma` listing into render sessions plus the default device
pub fn parse_listing(csv_text: &str) -> Result<SessionSnapshot, SessionError> {
    let text = csv_text.trim_start_matches('\u{feff}');
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut snapshot = SessionSnapshot::default();
    for result in reader.deserialize::<Row>() {
        let row = result.map_err(|e| SessionError::Parse(e.to_string()))?;
        if row.direction.trim() != "Render" {
            continue;
        }
        match row.kind.trim() {
            "Application" => {
                let Some(process) = process_name(&row.process_path) else {
                    continue;
                };
                let device = device_of(&row.friendly_id);
                // One entry per process, listing every device it plays on
                match snapshot.sessions.iter().position(|s| s.process == process) {
                    Some(index) => {
                        let session = &mut snapshot.sessions[index];
                        if let Some(device) = device {
                            if !session.plays_on(&device) {
                                session.devices.push(device);
                            }
                        }
                    }
                    None => snapshot.sessions.push(AudioSession {
                        process,
                        state: SessionState::Active,
                        devices: device.into_iter().collect(),
                    }),
                }
            }
            "Device" if !row.default.trim().is_empty() => {
                snapshot.default_render = device_of(&row.friendly_id);
            }
            _ => {}
        }
    }
    Ok(snapshot)
}

/// Whether `/SetAppDefault` output reports at least one matched item
fn assignment_succeeded(stdout: &str) -> bool {
    let words: Vec<&str> = stdout.split_whitespace().collect();
    words.windows(2).any(|pair| {
        pair[1].starts_with("item") && pair[0].parse::<u32>().is_ok_and(|n| n > 0)
    })
}

#[async_trait]
impl AudioSessions for Svcl {
    async fn probe(&self) -> Result<(), SessionError> {
        self.snapshot().await.map(|s| {
            debug!("svcl usable ({} render sessions)", s.sessions.len());
        })
    }

    async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let listing = std::env::temp_dir().join(format!("vr-audio-router-{}.csv", Uuid::new_v4()));
        let listing_arg = listing.to_string_lossy().into_owned();

        let result = async {
            self.run(&["/scomma", &listing_arg, "/Columns", COLUMNS]).await?;
            let bytes = tokio::fs::read(&listing).await?;
            parse_listing(&String::from_utf8_lossy(&bytes))
        }
        .await;

        let _ = tokio::fs::remove_file(&listing).await;
        result
    }

    async fn assign(&self, process: &str, target: &DeviceTarget) -> Result<(), SessionError> {
        let output = self
            .run(&["/Stdout", "/SetAppDefault", target.as_arg(), "all", process])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        if assignment_succeeded(&stdout) {
            Ok(())
        } else {
            Err(SessionError::Rejected {
                process: process.to_string(),
                device: target.to_string(),
                output: stdout.trim().to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = "\u{feff}Name,Type,Direction,Default,Process Path,Command-Line Friendly ID\r\n\
Speakers,Device,Render,Render,,Realtek High Definition Audio\\Device\\Speakers\\Render\r\n\
Voicemeeter Input,Device,Render,,,VB-Audio Voicemeeter VAIO\\Device\\Voicemeeter Input\\Render\r\n\
Microphone,Device,Capture,Capture,,USB Audio\\Device\\Microphone\\Capture\r\n\
Google Chrome,Application,Render,,C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe,Realtek High Definition Audio\\Device\\Speakers\\Render\\chrome.exe\r\n\
Google Chrome,Application,Render,,C:\\Program Files\\Google\\Chrome\\Application\\chrome.exe,Realtek High Definition Audio\\Device\\Speakers\\Render\\chrome.exe\r\n\
Spotify,Application,Render,,C:\\Users\\me\\AppData\\Roaming\\Spotify\\Spotify.exe,VB-Audio Voicemeeter VAIO\\Device\\Voicemeeter Input\\Render\\Spotify.exe\r\n\
System Sounds,Application,Render,,,Realtek High Definition Audio\\Device\\Speakers\\Render\r\n\
Discord,Application,Capture,,C:\\Discord\\Discord.exe,USB Audio\\Device\\Microphone\\Capture\\Discord.exe\r\n";

    #[test]
    fn test_parse_listing() {
        let snapshot = parse_listing(LISTING).unwrap();
        assert_eq!(
            snapshot.default_render.as_deref(),
            Some(r"Realtek High Definition Audio\Device\Speakers\Render")
        );

        let processes: Vec<&str> = snapshot.sessions.iter().map(|s| s.process.as_str()).collect();
        assert_eq!(processes, vec!["chrome.exe", "spotify.exe"]);

        let spotify = &snapshot.sessions[1];
        assert_eq!(spotify.state, SessionState::Active);
        assert_eq!(
            spotify.devices,
            vec![r"VB-Audio Voicemeeter VAIO\Device\Voicemeeter Input\Render".to_string()]
        );
        // Duplicate rows on the same device collapse
        assert_eq!(snapshot.sessions[0].devices.len(), 1);
    }

    #[test]
    fn test_parse_keeps_every_device_of_a_process() {
        let listing = "Name,Type,Direction,Default,Process Path,Command-Line Friendly ID\n\
Google Chrome,Application,Render,,C:\\Chrome\\chrome.exe,VB-Audio Voicemeeter VAIO\\Device\\Voicemeeter Input\\Render\\chrome.exe\n\
Google Chrome,Application,Render,,C:\\Chrome\\chrome.exe,Realtek High Definition Audio\\Device\\Speakers\\Render\\chrome.exe\n";
        let snapshot = parse_listing(listing).unwrap();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(
            snapshot.sessions[0].devices,
            vec![
                r"VB-Audio Voicemeeter VAIO\Device\Voicemeeter Input\Render".to_string(),
                r"Realtek High Definition Audio\Device\Speakers\Render".to_string(),
            ]
        );
    }

    #[test]
    fn test_parse_tolerates_short_rows() {
        let snapshot = parse_listing("Name,Type,Direction\nFoo,Application,Render\n").unwrap();
        assert!(snapshot.sessions.is_empty());
        assert!(snapshot.default_render.is_none());
    }

    #[test]
    fn test_device_of_friendly_id() {
        assert_eq!(
            device_of(r"Vendor\Device\Out\Render\app.exe").as_deref(),
            Some(r"Vendor\Device\Out\Render")
        );
        assert_eq!(device_of(r"Vendor\Device\Mic\Capture"), None);
    }

    #[test]
    fn test_assignment_output() {
        assert!(assignment_succeeded("1 item found"));
        assert!(assignment_succeeded("3 items found"));
        assert!(!assignment_succeeded("0 items found."));
        assert!(!assignment_succeeded(""));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let svcl = Svcl::new("/definitely/not/here/svcl.exe");
        assert!(matches!(svcl.probe().await, Err(SessionError::ToolMissing(_))));
    }
}
