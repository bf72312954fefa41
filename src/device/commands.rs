//! Traffic-test command templates for FortiGate firewalls.

use std::fmt;

/// Role of a command in the traffic-test sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    ClientIntf,
    ServerIntf,
    Port,
    /// Starts the test; its output is the measurement report.
    Run,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCommand {
    pub kind: CommandKind,
    pub text: String,
}

impl DeviceCommand {
    pub fn is_run(&self) -> bool {
        self.kind == CommandKind::Run
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Interface the traffic test is sourced from.
///
/// Small-branch models name their WAN port differently, and devices addressed
/// from the loopback range are tested from `Loopback0`.
pub fn test_interface(device_ip: &str, type_slug: &str, loopback_prefix: &str) -> &'static str {
    if !loopback_prefix.is_empty() && device_ip.starts_with(loopback_prefix) {
        return "Loopback0";
    }
    if type_slug.contains("-40f") {
        return "wan";
    }
    if type_slug.contains("-60f") {
        return "wan1";
    }
    "WAN"
}

/// The four commands that configure and start a traffic test toward the
/// local iperf3 server.
pub fn traffictest_commands(
    server_ip: &str,
    server_port: u16,
    device_ip: &str,
    type_slug: &str,
    loopback_prefix: &str,
) -> Vec<DeviceCommand> {
    let intf = test_interface(device_ip, type_slug, loopback_prefix);
    vec![
        DeviceCommand {
            kind: CommandKind::ClientIntf,
            text: format!("diagnose traffictest client-intf {intf}"),
        },
        DeviceCommand {
            kind: CommandKind::ServerIntf,
            text: format!("diagnose traffictest server-intf {intf}"),
        },
        DeviceCommand {
            kind: CommandKind::Port,
            text: format!("diagnose traffictest port {server_port}"),
        },
        DeviceCommand {
            kind: CommandKind::Run,
            text: format!("diagnose traffictest run -c {server_ip} -B {device_ip} -J"),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOOPBACK: &str = "10.52.22.";

    #[test]
    fn test_interface_selection() {
        assert_eq!(test_interface("10.1.1.1", "fortigate-100f", LOOPBACK), "WAN");
        assert_eq!(test_interface("10.1.1.1", "fortigate-60f", LOOPBACK), "wan1");
        assert_eq!(test_interface("10.1.1.1", "fortigate-40f", LOOPBACK), "wan");
        assert_eq!(test_interface("10.52.22.7", "fortigate-60f", LOOPBACK), "Loopback0");
        assert_eq!(test_interface("10.52.22.7", "", ""), "WAN");
    }

    #[test]
    fn test_command_sequence() {
        let cmds = traffictest_commands("192.0.2.10", 5201, "10.1.1.1", "fortigate-60f", LOOPBACK);

        assert_eq!(cmds.len(), 4);
        assert_eq!(cmds[0].text, "diagnose traffictest client-intf wan1");
        assert_eq!(cmds[1].text, "diagnose traffictest server-intf wan1");
        assert_eq!(cmds[2].text, "diagnose traffictest port 5201");
        assert_eq!(cmds[3].text, "diagnose traffictest run -c 192.0.2.10 -B 10.1.1.1 -J");
        assert_eq!(cmds.iter().filter(|c| c.is_run()).count(), 1);
        assert!(cmds[3].is_run());
    }
}
