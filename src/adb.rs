//! adb command lines bound to one device.

use crate::error::{Error, Result};
use crate::subprocess::{ProcessCommand, ProcessCommandBuilder};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adb {
    program: String,
    base_args: Vec<String>,
    device: String,
}

impl Adb {
    /// `command_line` is the adb invocation, optionally with leading flags
    /// such as `adb -H 10.0.0.2`. An empty `device` targets the only
    /// attached device.
    pub fn new(command_line: &str, device: &str) -> Result<Self> {
        let words = shell_words::split(command_line)
            .map_err(|e| Error::Config(format!("Invalid adb command {command_line:?}: {e}")))?;
        let (program, base_args) = words
            .split_first()
            .ok_or_else(|| Error::Config("adb command is empty".to_string()))?;

        Ok(Self {
            program: program.clone(),
            base_args: base_args.to_vec(),
            device: device.to_string(),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn command<I, S>(&self, args: I) -> ProcessCommandBuilder
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut builder = ProcessCommandBuilder::new(&self.program).args(&self.base_args);
        if !self.device.is_empty() {
            builder = builder.args(["-s", self.device.as_str()]);
        }
        builder.args(args)
    }

    pub fn shell<I, S>(&self, args: I) -> ProcessCommandBuilder
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.command(["shell"]).args(args)
    }

    /// Forward host `tcp:port` to the same port on the device.
    pub fn forward(&self, port: u16) -> ProcessCommand {
        let spec = format!("tcp:{port}");
        self.command(["forward", spec.as_str(), spec.as_str()])
            .build()
    }

    pub fn remove_forward(&self, port: u16) -> ProcessCommand {
        let spec = format!("tcp:{port}");
        self.command(["forward", "--remove", spec.as_str()]).build()
    }

    /// Kill every device-side process whose command line matches `pattern`.
    pub fn force_kill(&self, pattern: &str) -> ProcessCommand {
        self.shell(["pkill", "-9", "-f", pattern]).build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_commands() {
        let adb = Adb::new("adb", "emulator-5554").unwrap();

        assert_eq!(
            adb.forward(7009).display(),
            "adb -s emulator-5554 forward tcp:7009 tcp:7009"
        );
        assert_eq!(
            adb.remove_forward(7009).display(),
            "adb -s emulator-5554 forward --remove tcp:7009"
        );
    }

    #[test]
    fn test_command_line_with_flags() {
        let adb = Adb::new("/opt/sdk/adb -H 'build host'", "dev").unwrap();
        let command = adb.shell(["echo", "hi"]).build();

        assert_eq!(command.program, "/opt/sdk/adb");
        assert_eq!(
            command.args,
            vec!["-H", "build host", "-s", "dev", "shell", "echo", "hi"]
        );
    }

    #[test]
    fn test_empty_device_omits_serial() {
        let adb = Adb::new("adb", "").unwrap();
        assert_eq!(adb.force_kill("monkey").display(), "adb shell pkill -9 -f monkey");
    }

    #[test]
    fn test_rejects_empty_command() {
        assert!(matches!(Adb::new("  ", "dev"), Err(Error::Config(_))));
        assert!(matches!(Adb::new("adb 'unterminated", "dev"), Err(Error::Config(_))));
    }
}
