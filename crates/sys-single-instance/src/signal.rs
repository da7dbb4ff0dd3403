//! The signal a second instance uses to wake the first one.
//!
//! Only signals that can be caught and that hosts rarely use for anything
//! else are offered. The owner registers a handler before its claim becomes
//! visible, so the default action (terminate, for most of these) never runs.

use std::fmt;
use std::str::FromStr;

use nix::sys::signal::Signal;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WakeSignal {
    #[default]
    User1,
    User2,
    Hangup,
    WindowChange,
}

impl WakeSignal {
    pub const ALL: [WakeSignal; 4] = [
        WakeSignal::User1,
        WakeSignal::User2,
        WakeSignal::Hangup,
        WakeSignal::WindowChange,
    ];

    pub fn as_nix(self) -> Signal {
        match self {
            WakeSignal::User1 => Signal::SIGUSR1,
            WakeSignal::User2 => Signal::SIGUSR2,
            WakeSignal::Hangup => Signal::SIGHUP,
            WakeSignal::WindowChange => Signal::SIGWINCH,
        }
    }

    /// Raw number, as `signal-hook` registers it.
    pub fn as_raw(self) -> i32 {
        self.as_nix() as i32
    }
}

impl fmt::Display for WakeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_nix().as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported wake signal {0:?} (expected one of usr1, usr2, hup, winch)")]
pub struct ParseSignalError(String);

impl FromStr for WakeSignal {
    type Err = ParseSignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "USR1" => Ok(WakeSignal::User1),
            "USR2" => Ok(WakeSignal::User2),
            "HUP" => Ok(WakeSignal::Hangup),
            "WINCH" => Ok(WakeSignal::WindowChange),
            _ => Err(ParseSignalError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_common_spellings() {
        assert_eq!("usr1".parse(), Ok(WakeSignal::User1));
        assert_eq!("SIGUSR2".parse(), Ok(WakeSignal::User2));
        assert_eq!(" sighup ".parse(), Ok(WakeSignal::Hangup));
        assert_eq!("WINCH".parse(), Ok(WakeSignal::WindowChange));
    }

    #[test]
    fn test_parse_rejects_fatal_signals() {
        assert!("SIGKILL".parse::<WakeSignal>().is_err());
        assert!("term".parse::<WakeSignal>().is_err());
    }

    #[test]
    fn test_display_parses_back() {
        for signal in WakeSignal::ALL {
            assert_eq!(signal.to_string().parse(), Ok(signal));
        }
    }

    #[test]
    fn test_raw_numbers_match_signal_hook() {
        assert_eq!(WakeSignal::User1.as_raw(), signal_hook::consts::SIGUSR1);
        assert_eq!(WakeSignal::WindowChange.as_raw(), signal_hook::consts::SIGWINCH);
    }
}
