//! Board discovery.
//!
//! Candidate ports are probed one after another with the bridge handshake.
//! A port is only selected automatically when exactly one board answers;
//! anything else is reported back so that the user can name the port.

use {
    crate::{
        device::{DetectedPort, board_candidates},
        error::{PortResolutionError, Result},
        port::Port,
        protocol::exchange::exchange_status,
        target::{
            TargetConfig,
            picduino::protocol::{HANDSHAKE_ACK, Request},
        },
    },
    log::{debug, info, warn},
};

#[cfg(feature = "native")]
use crate::port::{NativePort, SerialConfig};

/// Send the handshake and report whether a board answered.
///
/// A wrong reply or no reply at all is a negative answer, not an error;
/// only port failures are errors.
pub fn probe<P: Port>(port: &mut P, config: &TargetConfig) -> Result<bool> {
    let request = Request::Handshake.encode(config)?;
    match exchange_status(port, &request, HANDSHAKE_ACK, config.probe_timeout)? {
        Ok(()) => Ok(true),
        Err(e) => {
            debug!("{}: no board ({e})", port.name());
            Ok(false)
        },
    }
}

/// Probe `candidates` in order and return the names of those that answered.
///
/// Each port is opened with `open`, probed and closed before the next one is
/// touched. Ports that cannot be opened or fail during the probe are
/// skipped.
pub fn find_boards<'a, P, I, F>(candidates: I, config: &TargetConfig, mut open: F) -> Vec<String>
where
    P: Port,
    I: IntoIterator<Item = &'a str>,
    F: FnMut(&str) -> Result<P>,
{
    let mut found = Vec::new();

    for name in candidates {
        let mut port = match open(name) {
            Ok(port) => port,
            Err(e) => {
                warn!("Skipping {name}: {e}");
                continue;
            },
        };

        let timeout = port
            .timeout()
            .min(config.probe_timeout);
        let answered = port
            .set_timeout(timeout)
            .and_then(|()| probe(&mut port, config));
        if let Err(e) = port.close() {
            debug!("Failed to close {name}: {e}");
        }

        match answered {
            Ok(true) => {
                debug!("Board answered on {name}");
                found.push(name.to_string());
            },
            Ok(false) => {},
            Err(e) => warn!("Probe on {name} failed: {e}"),
        }
    }

    found
}

/// Pick the single responder.
pub fn select_board(
    mut responders: Vec<String>,
    available: &[DetectedPort],
) -> std::result::Result<String, PortResolutionError> {
    match responders.len() {
        1 => Ok(responders.remove(0)),
        0 => Err(PortResolutionError::NoBoardFound {
            available: names(available),
        }),
        _ => Err(PortResolutionError::AmbiguousAutoDetect {
            candidates: responders,
        }),
    }
}

/// Check that an explicitly requested port exists.
pub fn validate_port(
    requested: &str,
    available: &[DetectedPort],
) -> std::result::Result<(), PortResolutionError> {
    if available
        .iter()
        .any(|p| p.name == requested)
    {
        Ok(())
    } else {
        Err(PortResolutionError::NotFound {
            requested: requested.to_string(),
            available: names(available),
        })
    }
}

/// Resolve the port to upload to.
///
/// An explicit port is validated against `available`; otherwise the board
/// candidates among `available` are probed through `open`.
pub fn resolve_port_with<P, F>(
    requested: Option<&str>,
    available: &[DetectedPort],
    config: &TargetConfig,
    open: F,
) -> Result<String>
where
    P: Port,
    F: FnMut(&str) -> Result<P>,
{
    if let Some(requested) = requested {
        validate_port(requested, available)?;
        return Ok(requested.to_string());
    }

    let candidates = board_candidates(available);
    debug!("Probing {} candidate port(s)", candidates.len());
    let responders = find_boards(
        candidates
            .iter()
            .map(|p| p.name.as_str()),
        config,
        open,
    );
    let port = select_board(responders, available)?;
    info!("Board found on {port}");
    Ok(port)
}

/// Open a native port with the host settings of `config`.
#[cfg(feature = "native")]
pub fn open_native(name: &str, config: &TargetConfig) -> Result<NativePort> {
    NativePort::open(&SerialConfig::new(name, config.baud_rate).with_timeout(config.byte_timeout))
}

/// Resolve the port to upload to among the ports of this host.
#[cfg(feature = "native")]
pub fn resolve_port(requested: Option<&str>, config: &TargetConfig) -> Result<String> {
    let available = crate::device::detect_ports()?;
    resolve_port_with(requested, &available, config, |name| {
        open_native(name, config)
    })
}

/// Probe every board candidate of this host.
#[cfg(feature = "native")]
pub fn discover_boards(config: &TargetConfig) -> Result<Vec<String>> {
    let available = crate::device::detect_ports()?;
    let candidates = board_candidates(&available);
    Ok(find_boards(
        candidates
            .iter()
            .map(|p| p.name.as_str()),
        config,
        |name| open_native(name, config),
    ))
}

fn names(ports: &[DetectedPort]) -> Vec<String> {
    ports
        .iter()
        .map(|p| p.name.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            device::classify_ports,
            error::Error,
            port::{PortInfo, sim::SimulatedBoard},
        },
        std::{io, time::Duration},
    };

    fn config() -> TargetConfig {
        TargetConfig::default().with_probe_timeout(Duration::from_millis(30))
    }

    fn usb(name: &str, vid: u16, pid: u16) -> PortInfo {
        PortInfo {
            vid: Some(vid),
            pid: Some(pid),
            ..PortInfo::named(name)
        }
    }

    /// Boards answer on the named ports; every other port stays silent.
    fn opener(boards: &'static [&'static str]) -> impl FnMut(&str) -> Result<SimulatedBoard> {
        move |name| {
            let board = SimulatedBoard::named(name);
            Ok(if boards.iter().any(|b| *b == name) {
                board
            } else {
                board.silent()
            })
        }
    }

    #[test]
    fn test_probe_accepts_handshake() {
        let mut board = SimulatedBoard::new();
        assert!(probe(&mut board, &config()).unwrap());
        assert_eq!(board.frames, vec![vec![0x05, 0xAA]]);
    }

    #[test]
    fn test_probe_rejects_wrong_reply() {
        let mut board = SimulatedBoard::new().with_handshake_reply(0x42);
        assert!(!probe(&mut board, &config()).unwrap());
    }

    #[test]
    fn test_find_boards_is_sequential_and_skips_failures() {
        let mut opened = Vec::new();
        let found = find_boards(["a", "b", "c"], &config(), |name| {
            opened.push(name.to_string());
            match name {
                "b" => Err(Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, "busy"))),
                "c" => Ok(SimulatedBoard::named(name).silent()),
                _ => Ok(SimulatedBoard::named(name)),
            }
        });
        assert_eq!(found, vec!["a".to_string()]);
        assert_eq!(opened, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_resolve_single_board() {
        let available = classify_ports(vec![
            usb("/dev/ttyACM0", 0x04D8, 0x000A),
            PortInfo::named("/dev/ttyS0"),
        ]);
        let port = resolve_port_with(None, &available, &config(), opener(&["/dev/ttyACM0"]))
            .unwrap();
        assert_eq!(port, "/dev/ttyACM0");
    }

    #[test]
    fn test_resolve_no_board_lists_ports() {
        let available = classify_ports(vec![
            usb("/dev/ttyUSB0", 0x1A86, 0x7523),
            PortInfo::named("/dev/ttyS0"),
        ]);
        let err = resolve_port_with(None, &available, &config(), opener(&[])).unwrap_err();
        match err {
            Error::PortResolution(PortResolutionError::NoBoardFound { available }) => {
                assert_eq!(available, vec!["/dev/ttyUSB0", "/dev/ttyS0"]);
            },
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_resolve_ambiguous() {
        let available = classify_ports(vec![
            usb("/dev/ttyACM0", 0x04D8, 0x000A),
            usb("/dev/ttyACM1", 0x04D8, 0x000A),
        ]);
        let err = resolve_port_with(
            None,
            &available,
            &config(),
            opener(&["/dev/ttyACM0", "/dev/ttyACM1"]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::PortResolution(PortResolutionError::AmbiguousAutoDetect { ref candidates })
                if candidates.len() == 2
        ));
    }

    #[test]
    fn test_resolve_falls_back_to_usb_ports() {
        let available = classify_ports(vec![
            usb("/dev/ttyUSB0", 0x1A86, 0x7523),
            usb("/dev/ttyUSB1", 0x0403, 0x6001),
        ]);
        let port = resolve_port_with(None, &available, &config(), opener(&["/dev/ttyUSB1"]))
            .unwrap();
        assert_eq!(port, "/dev/ttyUSB1");
    }

    #[test]
    fn test_explicit_port_must_exist() {
        let available = classify_ports(vec![PortInfo::named("/dev/ttyS0")]);
        let err = resolve_port_with(
            Some("/dev/ttyACM7"),
            &available,
            &config(),
            opener(&["/dev/ttyACM7"]),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            Error::PortResolution(PortResolutionError::NotFound { ref requested, .. })
                if requested == "/dev/ttyACM7"
        ));

        let port = resolve_port_with(Some("/dev/ttyS0"), &available, &config(), opener(&[]))
            .unwrap();
        assert_eq!(port, "/dev/ttyS0");
    }
}
