//! External player discovery and invocation.
//!
//! Selection is deterministic per call: the OS and the set of programs on
//! `PATH` decide which player runs and with which arguments. Streaming
//! (stdin-fed) invocations are preferred wherever a player supports them;
//! file invocations are the fallback for tailed and deferred playback.

use std::{
    env,
    path::{Path, PathBuf},
};

use tokio::process::Command;

use super::{format::AudioFormat, Error};

/// A resolved player command line, ready to spawn.
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Absolute path of the player binary (or `powershell`).
    pub program: PathBuf,

    /// Arguments, in order.
    pub args: Vec<String>,
}

impl Invocation {
    /// Builds a [`Command`] from this invocation.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Searches `PATH` for an executable called `name`.
fn find_program(name: &str) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;

    for dir in env::split_paths(&path) {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }

        if cfg!(windows) {
            let candidate = dir.join(format!("{name}.exe"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }

    None
}

/// Formats a `0.0..=1.0` volume for players taking a unit float.
fn unit_volume(volume: f64) -> String {
    format!("{:.2}", volume.clamp(0.0, 1.0))
}

/// Formats a `0.0..=1.0` volume for `ffplay`'s `0..=100` scale.
fn percent_volume(volume: f64) -> String {
    format!("{}", (volume.clamp(0.0, 1.0) * 100.0).round() as u32)
}

/// `ffplay` reading from stdin.
fn ffplay_stdin(program: PathBuf, volume: f64) -> Invocation {
    Invocation {
        program,
        args: vec![
            "-nodisp".into(),
            "-autoexit".into(),
            "-volume".into(),
            percent_volume(volume),
            "-i".into(),
            "-".into(),
        ],
    }
}

/// Picks a stdin-streaming invocation, or [`None`] when the platform has no
/// player that can consume a pipe.
pub fn streaming(volume: f64) -> Option<Invocation> {
    streaming_on(env::consts::OS, volume, &find_program)
}

/// OS- and probe-parameterized body of [`streaming`].
fn streaming_on(
    os: &str,
    volume: f64,
    probe: &dyn Fn(&str) -> Option<PathBuf>,
) -> Option<Invocation> {
    match os {
        "macos" => probe("afplay").map(|program| Invocation {
            program,
            args: vec!["-v".into(), unit_volume(volume), "/dev/stdin".into()],
        }),
        "linux" => probe("ffplay")
            .map(|program| ffplay_stdin(program, volume))
            .or_else(|| {
                probe("play").map(|program| Invocation {
                    program,
                    args: vec!["-q".into(), "-v".into(), unit_volume(volume), "-".into()],
                })
            }),
        "windows" => probe("ffplay").map(|program| ffplay_stdin(program, volume)),
        _ => None,
    }
}

/// Whether progressive file tailing is safe on this platform.
///
/// Non-ffplay Windows players truncate a file that is still growing, so
/// tailing is disabled there unless `ffplay` is present.
pub fn tail_supported() -> bool {
    env::consts::OS != "windows" || find_program("ffplay").is_some()
}

/// Picks a file-playback invocation for `path`.
pub fn file(path: &Path, format: AudioFormat, volume: f64) -> Result<Invocation, Error> {
    file_on(env::consts::OS, path, format, volume, &find_program)
}

/// OS- and probe-parameterized body of [`file`].
fn file_on(
    os: &str,
    path: &Path,
    format: AudioFormat,
    volume: f64,
    probe: &dyn Fn(&str) -> Option<PathBuf>,
) -> Result<Invocation, Error> {
    let file = path.to_string_lossy().into_owned();

    match os {
        "macos" => probe("afplay")
            .map(|program| Invocation {
                program,
                args: vec!["-v".into(), unit_volume(volume), file.clone()],
            })
            .ok_or_else(|| Error::Spawn("afplay".into())),
        "windows" => Ok(probe("ffplay").map_or_else(
            || powershell_media_player(&file, volume),
            |program| Invocation {
                program,
                args: vec![
                    "-loglevel".into(),
                    "error".into(),
                    "-nodisp".into(),
                    "-autoexit".into(),
                    "-i".into(),
                    file.clone(),
                ],
            },
        )),
        "linux" => {
            // PCM goes to the ALSA/Pulse front ends first; compressed
            // formats need a decoding player.
            let candidates: &[&str] = if format.is_pcm() {
                &["aplay", "paplay", "play", "ffplay"]
            } else {
                &["ffplay", "play"]
            };

            for name in candidates {
                if let Some(program) = probe(name) {
                    return Ok(linux_file_invocation(name, program, &file, volume));
                }
            }

            Err(Error::Spawn(candidates.join(", ")))
        }
        other => Err(Error::Platform(other.to_owned())),
    }
}

/// Argument shapes for the Linux file players.
fn linux_file_invocation(name: &str, program: PathBuf, file: &str, volume: f64) -> Invocation {
    let args = match name {
        "ffplay" => vec![
            "-nodisp".into(),
            "-autoexit".into(),
            "-volume".into(),
            percent_volume(volume),
            "-i".into(),
            file.to_owned(),
        ],
        "play" => vec![
            "-q".into(),
            "-v".into(),
            unit_volume(volume),
            file.to_owned(),
        ],
        "aplay" => vec!["-q".into(), file.to_owned()],
        _ => vec![file.to_owned()],
    };

    Invocation { program, args }
}

/// The Windows fallback: `System.Windows.Media.MediaPlayer` driven from
/// PowerShell, with the volume injected into the script.
fn powershell_media_player(file: &str, volume: f64) -> Invocation {
    let script = format!(
        "Add-Type -AssemblyName PresentationCore; \
         $player = New-Object System.Windows.Media.MediaPlayer; \
         $player.Open([Uri]::new('{}')); \
         $player.Volume = {}; \
         $player.Play(); \
         while (-not $player.NaturalDuration.HasTimeSpan) {{ Start-Sleep -Milliseconds 100 }}; \
         Start-Sleep -Seconds $player.NaturalDuration.TimeSpan.TotalSeconds; \
         $player.Stop()",
        file.replace('\'', "''"),
        unit_volume(volume),
    );

    Invocation {
        program: PathBuf::from("powershell"),
        args: vec!["-NoProfile".into(), "-Command".into(), script],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A probe that pretends exactly `names` are installed.
    fn installed(names: &'static [&'static str]) -> impl Fn(&str) -> Option<PathBuf> {
        move |name| {
            names
                .contains(&name)
                .then(|| PathBuf::from(format!("/usr/bin/{name}")))
        }
    }

    #[test]
    fn macos_streams_through_afplay() {
        let inv = streaming_on("macos", 0.5, &installed(&["afplay"])).unwrap();
        assert!(inv.program.ends_with("afplay"));
        assert_eq!(inv.args, vec!["-v", "0.50", "/dev/stdin"]);
    }

    #[test]
    fn linux_prefers_ffplay_over_play() {
        let inv = streaming_on("linux", 1.0, &installed(&["play", "ffplay"])).unwrap();
        assert!(inv.program.ends_with("ffplay"));
        assert!(inv.args.contains(&"100".to_owned()));
    }

    #[test]
    fn linux_falls_back_to_play() {
        let inv = streaming_on("linux", 0.25, &installed(&["play"])).unwrap();
        assert_eq!(inv.args, vec!["-q", "-v", "0.25", "-"]);
    }

    #[test]
    fn windows_without_ffplay_has_no_streaming() {
        assert!(streaming_on("windows", 1.0, &installed(&[])).is_none());
    }

    #[test]
    fn linux_pcm_prefers_aplay() {
        let inv = file_on(
            "linux",
            Path::new("/tmp/a.wav"),
            AudioFormat::Wav,
            1.0,
            &installed(&["aplay", "ffplay"]),
        )
        .unwrap();
        assert!(inv.program.ends_with("aplay"));
    }

    #[test]
    fn linux_compressed_skips_aplay() {
        let inv = file_on(
            "linux",
            Path::new("/tmp/a.mp3"),
            AudioFormat::Mp3,
            1.0,
            &installed(&["aplay", "play"]),
        )
        .unwrap();
        assert!(inv.program.ends_with("play"));
    }

    #[test]
    fn missing_players_report_candidates() {
        let err = file_on(
            "linux",
            Path::new("/tmp/a.mp3"),
            AudioFormat::Mp3,
            1.0,
            &installed(&[]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Spawn(list) if list.contains("ffplay")));
    }

    #[test]
    fn windows_fallback_injects_volume() {
        let inv = file_on(
            "windows",
            Path::new("C:/tts/7.mp3"),
            AudioFormat::Mp3,
            0.4,
            &installed(&[]),
        )
        .unwrap();
        assert_eq!(inv.program, PathBuf::from("powershell"));
        assert!(inv.args[2].contains("$player.Volume = 0.40"));
    }

    #[test]
    fn unknown_os_is_a_platform_error() {
        let err = file_on(
            "plan9",
            Path::new("/tmp/a.wav"),
            AudioFormat::Wav,
            1.0,
            &installed(&["aplay"]),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Platform(_)));
    }
}
