#![forbid(unsafe_code)]

//! Emulator launch capability.
//!
//! The orchestrator only knows the [`Launcher`] trait. [`DosboxLauncher`] is
//! the production implementation; it turns a [`LaunchSequence`] into a DOSBox
//! command line, makes sure IPX is enabled, and starts the emulator without
//! waiting for it.

use std::{
    env,
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use ipxlink_core::{IpxConfig, IpxError, IpxResult, LaunchSequence};
use tracing::{debug, info};

/// Contents of the config fragment loaded with `-conf`.
pub const IPX_CONF: &str = "[ipx]\nipx=true\n";

/// Game to start once the network is configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameRef {
    /// Host directory mounted as `C:`.
    pub dir: PathBuf,
    /// Program invocation relative to `dir`, e.g. `doom2/DOOM2.EXE -net`.
    pub command: String,
}

impl GameRef {
    pub fn new(dir: impl Into<PathBuf>, command: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            command: command.into(),
        }
    }

    /// DOS shell steps running the program.
    ///
    /// `/` becomes `\` since DOS reads `/` as a switch. A program inside a
    /// subdirectory is started from that directory so relative data paths
    /// resolve.
    pub fn program_steps(&self) -> IpxResult<Vec<String>> {
        let dos = self.command.trim().replace('/', "\\");
        let mut words = dos.split_whitespace();
        let exe = words
            .next()
            .ok_or_else(|| IpxError::Usage("game command is empty".into()))?;

        let mut steps = Vec::with_capacity(2);
        let exe = match exe.rsplit_once('\\') {
            Some((subdir, name)) if !subdir.is_empty() && !name.is_empty() => {
                steps.push(format!("CD {subdir}"));
                name
            }
            _ => exe,
        };
        let mut line = exe.to_string();
        for arg in words {
            line.push(' ');
            line.push_str(arg);
        }
        steps.push(line);
        Ok(steps)
    }
}

/// Hands a finished launch sequence to an emulator.
pub trait Launcher {
    fn launch(&self, game: &GameRef, sequence: &LaunchSequence) -> IpxResult<()>;
}

/// Host platform quirks relevant to launching DOSBox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Unix,
    Windows,
}

impl Platform {
    #[must_use]
    pub fn current() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Unix
        }
    }

    /// Path as written in a DOSBox `MOUNT` command. DOSBox accepts forward
    /// slashes on Windows and they survive its own quoting.
    #[must_use]
    pub fn mount_path(self, dir: &Path) -> String {
        let path = dir.to_string_lossy();
        match self {
            Self::Unix => path.into_owned(),
            Self::Windows => path.replace('\\', "/"),
        }
    }

    /// Executables searched on `PATH`, preferred first.
    #[must_use]
    pub fn executable_names(self) -> &'static [&'static str] {
        match self {
            Self::Unix => &["dosbox-staging", "dosbox"],
            Self::Windows => &["dosbox-staging.exe", "dosbox.exe"],
        }
    }

    /// Install locations checked when `PATH` has no match.
    #[must_use]
    pub fn install_locations(self) -> &'static [&'static str] {
        match self {
            Self::Unix => &[],
            Self::Windows => &[
                "C:/Program Files/DOSBox-Staging/dosbox.exe",
                "C:/Program Files/DOSBox/dosbox.exe",
                "C:/Program Files (x86)/DOSBox/dosbox.exe",
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct DosboxLauncher {
    platform: Platform,
    executable: Option<PathBuf>,
    ipx_conf: PathBuf,
}

impl DosboxLauncher {
    #[must_use]
    pub fn new(platform: Platform, config: &IpxConfig) -> Self {
        Self {
            platform,
            executable: config.dosbox_path.clone(),
            ipx_conf: config.ipx_conf_path(),
        }
    }

    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Resolve the emulator binary: the configured one, else `PATH`, else the
    /// platform's usual install locations.
    pub fn locate(&self) -> IpxResult<PathBuf> {
        if let Some(explicit) = &self.executable {
            return which::which(explicit).map_err(|e| {
                IpxError::Launch(format!("configured emulator '{}': {e}", explicit.display()))
            });
        }
        if let Some(found) = self
            .platform
            .executable_names()
            .iter()
            .find_map(|name| which::which(name).ok())
        {
            return Ok(found);
        }
        self.platform
            .install_locations()
            .iter()
            .map(PathBuf::from)
            .find(|p| p.is_file())
            .ok_or_else(|| {
                IpxError::Launch(
                    "DOSBox not found; install dosbox-staging or set dosbox_path in the config".into(),
                )
            })
    }

    /// Write the IPX fragment if it does not exist yet. An existing file is
    /// left alone so users can extend it.
    pub fn ensure_ipx_conf(&self) -> IpxResult<&Path> {
        let path = self.ipx_conf.as_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, IPX_CONF)?;
            debug!(path = %path.display(), "created IPX config");
        }
        Ok(path)
    }

    /// DOSBox arguments: load the IPX fragment, mount the game, switch to
    /// `C:`, then run every command of the sequence in order. No trailing
    /// `exit`; players leave a network game themselves.
    #[must_use]
    pub fn command_line(&self, game_dir: &Path, sequence: &LaunchSequence, ipx_conf: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-conf".into(),
            ipx_conf.into(),
            "-c".into(),
            format!("MOUNT C \"{}\"", self.platform.mount_path(game_dir)).into(),
            "-c".into(),
            "C:".into(),
        ];
        for command in sequence.commands() {
            args.push("-c".into());
            args.push(command.into());
        }
        args
    }
}

impl Launcher for DosboxLauncher {
    fn launch(&self, game: &GameRef, sequence: &LaunchSequence) -> IpxResult<()> {
        let dir = if game.dir.is_absolute() {
            game.dir.clone()
        } else {
            env::current_dir()?.join(&game.dir)
        };
        if !dir.is_dir() {
            return Err(IpxError::Launch(format!("'{}' is not a directory", dir.display())));
        }
        let exe = self.locate()?;
        let conf = self.ensure_ipx_conf()?;
        let args = self.command_line(&dir, sequence, conf);
        debug!(exe = %exe.display(), ?args, "starting emulator");

        let mut cmd = Command::new(&exe);
        cmd.args(&args)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            cmd.creation_flags(CREATE_NO_WINDOW);
        }
        let child = cmd
            .spawn()
            .map_err(|e| IpxError::Launch(format!("{}: {e}", exe.display())))?;
        info!(pid = child.id(), exe = %exe.display(), "emulator started");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipxlink_core::RoleConfig;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn launcher(platform: Platform, conf: &Path) -> DosboxLauncher {
        let config = IpxConfig {
            ipx_conf_path: Some(conf.to_path_buf()),
            ..IpxConfig::default()
        };
        DosboxLauncher::new(platform, &config)
    }

    #[test]
    fn plain_program() {
        let game = GameRef::new("/games/doom", "DOOM.EXE");
        assert_eq!(game.program_steps().unwrap(), vec!["DOOM.EXE"]);
    }

    #[test]
    fn program_in_subdirectory() {
        let game = GameRef::new("/games", "doom2/bin/DOOM2.EXE  -net   -skill 3");
        assert_eq!(
            game.program_steps().unwrap(),
            vec!["CD doom2\\bin", "DOOM2.EXE -net -skill 3"]
        );
    }

    #[test]
    fn empty_command_is_rejected() {
        let game = GameRef::new("/games", "   ");
        assert!(matches!(game.program_steps(), Err(IpxError::Usage(_))));
    }

    #[test]
    fn windows_mount_uses_forward_slashes() {
        let dir = Path::new(r"C:\Games\Doom");
        assert_eq!(Platform::Windows.mount_path(dir), "C:/Games/Doom");
        assert_eq!(Platform::Unix.mount_path(Path::new("/srv/doom")), "/srv/doom");
    }

    #[test]
    fn executable_names_follow_platform() {
        assert_eq!(Platform::Unix.executable_names(), ["dosbox-staging", "dosbox"]);
        assert_eq!(Platform::Windows.executable_names(), ["dosbox-staging.exe", "dosbox.exe"]);
        assert!(Platform::Unix.install_locations().is_empty());
    }

    #[test]
    fn network_directive_precedes_program() {
        let conf = Path::new("/cfg/ipx.conf");
        let game = GameRef::new("/games", "doom/DOOM.EXE");
        let seq = RoleConfig::server(19900).then_run(game.program_steps().unwrap());
        let args = launcher(Platform::Unix, conf).command_line(Path::new("/games"), &seq, conf);
        assert_eq!(
            strings(&args),
            vec![
                "-conf",
                "/cfg/ipx.conf",
                "-c",
                "MOUNT C \"/games\"",
                "-c",
                "C:",
                "-c",
                "IPXNET STARTSERVER 19900",
                "-c",
                "CD doom",
                "-c",
                "DOOM.EXE",
            ]
        );
        assert!(!strings(&args).iter().any(|a| a.eq_ignore_ascii_case("exit")));
    }

    #[test]
    fn ipx_conf_is_created_once() {
        let dir = tempfile::tempdir().unwrap();
        let conf = dir.path().join("nested").join("ipx.conf");
        let launcher = launcher(Platform::current(), &conf);

        assert_eq!(launcher.ensure_ipx_conf().unwrap(), conf.as_path());
        assert_eq!(fs::read_to_string(&conf).unwrap(), IPX_CONF);

        fs::write(&conf, "[ipx]\nipx=true\n# user edit\n").unwrap();
        launcher.ensure_ipx_conf().unwrap();
        assert!(fs::read_to_string(&conf).unwrap().contains("# user edit"));
    }

    #[test]
    fn missing_configured_emulator() {
        let dir = tempfile::tempdir().unwrap();
        let config = IpxConfig {
            dosbox_path: Some(dir.path().join("no-such-dosbox")),
            ..IpxConfig::default()
        };
        let launcher = DosboxLauncher::new(Platform::current(), &config);
        assert!(matches!(launcher.locate(), Err(IpxError::Launch(_))));
    }

    #[test]
    fn launch_rejects_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = launcher(Platform::current(), &dir.path().join("ipx.conf"));
        let game = GameRef::new(dir.path().join("absent"), "GAME.EXE");
        let seq = RoleConfig::server(19900).then_run(game.program_steps().unwrap());
        assert!(matches!(launcher.launch(&game, &seq), Err(IpxError::Launch(_))));
    }
}
