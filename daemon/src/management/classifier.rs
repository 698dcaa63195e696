use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref WORKER_READY: Regex = Regex::new(
        r#"\[\d{2}:\d{2}:\d{2} INFO\]: Done \(\d+\.\d+s\)! For help, type "help" or "\?""#
    )
    .expect("failed to compile WORKER_READY regex");
    static ref ROUTER_READY: Regex =
        Regex::new(r"\d{2}:\d{2}:\d{2} \[INFO\] Listening on /\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}:\d+")
            .expect("failed to compile ROUTER_READY regex");
    static ref PLAYER_LOGIN: Regex = Regex::new(
        r"\[\d{2}:\d{2}:\d{2} INFO\]: ([A-Za-z0-9_\-]+)\[/(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):\d+\] logged in"
    )
    .expect("failed to compile PLAYER_LOGIN regex");
    static ref PLAYER_LOGOUT: Regex =
        Regex::new(r"\[\d{2}:\d{2}:\d{2} INFO\]: ([A-Za-z0-9_\-]+) lost connection")
            .expect("failed to compile PLAYER_LOGOUT regex");
}

/// Structured signal extracted from a single console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineSignal {
    /// Worker finished startup ("Done (…s)!" line).
    WorkerReady,
    /// Router proxy bound its listen address.
    RouterReady,
    PlayerJoined { name: String, ip: String },
    PlayerLeft { name: String },
}

/// Classifies one raw console line. Stateless; at most one signal per line,
/// unmatched lines yield `None`.
pub fn classify(line: &str) -> Option<LineSignal> {
    if WORKER_READY.is_match(line) {
        return Some(LineSignal::WorkerReady);
    }
    if ROUTER_READY.is_match(line) {
        return Some(LineSignal::RouterReady);
    }
    if let Some(caps) = PLAYER_LOGIN.captures(line) {
        return Some(LineSignal::PlayerJoined {
            name: caps[1].to_string(),
            ip: caps[2].to_string(),
        });
    }
    if let Some(caps) = PLAYER_LOGOUT.captures(line) {
        return Some(LineSignal::PlayerLeft {
            name: caps[1].to_string(),
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn worker_ready_line() {
        let line = r#"[12:34:56 INFO]: Done (3.2s)! For help, type "help" or "?""#;
        assert_eq!(classify(line), Some(LineSignal::WorkerReady));
    }

    #[test]
    fn router_ready_line() {
        let line = "12:34:56 [INFO] Listening on /0.0.0.0:25565";
        assert_eq!(classify(line), Some(LineSignal::RouterReady));
    }

    #[test]
    fn player_login_captures_full_name_and_ip() {
        let line = "[18:01:22 INFO]: Steve[/127.0.0.1:51234] logged in with entity id 161";
        assert_eq!(
            classify(line),
            Some(LineSignal::PlayerJoined {
                name: "Steve".to_string(),
                ip: "127.0.0.1".to_string(),
            })
        );

        // underscores and digits are part of the username
        let line = "[18:01:22 INFO]: xX_Notch_42[/10.0.0.7:4242] logged in with entity id 9";
        assert_eq!(
            classify(line),
            Some(LineSignal::PlayerJoined {
                name: "xX_Notch_42".to_string(),
                ip: "10.0.0.7".to_string(),
            })
        );
    }

    #[test]
    fn player_logout_line() {
        let line = "[18:05:09 INFO]: Steve lost connection: Disconnected";
        assert_eq!(
            classify(line),
            Some(LineSignal::PlayerLeft {
                name: "Steve".to_string(),
            })
        );
    }

    #[test]
    fn chatter_is_no_signal() {
        assert_eq!(classify("[12:00:00 INFO]: Preparing spawn area: 97%"), None);
        assert_eq!(classify("[12:00:00 WARN]: Can't keep up!"), None);
        assert_eq!(classify(""), None);
        // a player merely being mentioned is not a presence change
        assert_eq!(classify("[12:00:00 INFO]: <Steve> logged in? no"), None);
    }
}
