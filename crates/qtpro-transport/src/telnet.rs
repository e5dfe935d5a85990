//! Minimal telnet option handling.
//!
//! The controller listens on the telnet port and may open the session with
//! option negotiation. The protocol itself is plain ASCII, so every option
//! is refused (`DO` → `WONT`, `WILL` → `DONT`) and all IAC sequences are
//! removed from the data stream before it reaches the framing layer.
//!
//! [`TelnetFilter`] is stateful so that sequences split across reads are
//! handled correctly.

/// Interpret As Command.
pub const IAC: u8 = 255;
/// Refuse to let the peer perform an option.
pub const DONT: u8 = 254;
/// Ask the peer to perform an option.
pub const DO: u8 = 253;
/// Refuse to perform an option.
pub const WONT: u8 = 252;
/// Offer to perform an option.
pub const WILL: u8 = 251;
/// Subnegotiation begin.
pub const SB: u8 = 250;
/// Subnegotiation end.
pub const SE: u8 = 240;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum State {
    #[default]
    Data,
    Iac,
    Option(u8),
    Subneg,
    SubnegIac,
}

/// Streaming filter that strips telnet commands and collects refusals.
#[derive(Debug, Default)]
pub struct TelnetFilter {
    state: State,
}

impl TelnetFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter `buf[..n]` in place.
    ///
    /// Returns the number of data bytes left at the front of `buf`. Any
    /// negotiation replies are appended to `replies` and must be written
    /// back to the peer by the caller.
    pub fn filter(&mut self, buf: &mut [u8], n: usize, replies: &mut Vec<u8>) -> usize {
        let mut out = 0;
        for i in 0..n {
            let byte = buf[i];
            self.state = match self.state {
                State::Data => {
                    if byte == IAC {
                        State::Iac
                    } else {
                        buf[out] = byte;
                        out += 1;
                        State::Data
                    }
                }
                State::Iac => match byte {
                    IAC => {
                        // Escaped 0xFF data byte.
                        buf[out] = IAC;
                        out += 1;
                        State::Data
                    }
                    WILL | WONT | DO | DONT => State::Option(byte),
                    SB => State::Subneg,
                    _ => State::Data,
                },
                State::Option(command) => {
                    match command {
                        DO => replies.extend_from_slice(&[IAC, WONT, byte]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, byte]),
                        _ => {}
                    }
                    tracing::trace!(command, option = byte, "refused telnet option");
                    State::Data
                }
                State::Subneg => {
                    if byte == IAC {
                        State::SubnegIac
                    } else {
                        State::Subneg
                    }
                }
                State::SubnegIac => {
                    if byte == SE {
                        State::Data
                    } else {
                        State::Subneg
                    }
                }
            };
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(filter: &mut TelnetFilter, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut buf = input.to_vec();
        let mut replies = Vec::new();
        let n = filter.filter(&mut buf, input.len(), &mut replies);
        buf.truncate(n);
        (buf, replies)
    }

    #[test]
    fn plain_data_passes_through() {
        let mut f = TelnetFilter::new();
        let (data, replies) = run(&mut f, b"{CSGET,IPAD=172.16.10.141}\r\n");
        assert_eq!(data, b"{CSGET,IPAD=172.16.10.141}\r\n");
        assert!(replies.is_empty());
    }

    #[test]
    fn do_is_refused_with_wont() {
        let mut f = TelnetFilter::new();
        let (data, replies) = run(&mut f, &[IAC, DO, 1, b'{']);
        assert_eq!(data, b"{");
        assert_eq!(replies, vec![IAC, WONT, 1]);
    }

    #[test]
    fn will_is_refused_with_dont() {
        let mut f = TelnetFilter::new();
        let (data, replies) = run(&mut f, &[IAC, WILL, 3]);
        assert!(data.is_empty());
        assert_eq!(replies, vec![IAC, DONT, 3]);
    }

    #[test]
    fn wont_and_dont_need_no_reply() {
        let mut f = TelnetFilter::new();
        let (data, replies) = run(&mut f, &[IAC, WONT, 1, IAC, DONT, 3, b'x']);
        assert_eq!(data, b"x");
        assert!(replies.is_empty());
    }

    #[test]
    fn escaped_iac_is_data() {
        let mut f = TelnetFilter::new();
        let (data, _) = run(&mut f, &[b'a', IAC, IAC, b'b']);
        assert_eq!(data, vec![b'a', IAC, b'b']);
    }

    #[test]
    fn subnegotiation_is_dropped() {
        let mut f = TelnetFilter::new();
        let (data, replies) = run(&mut f, &[IAC, SB, 24, 1, IAC, SE, b'o', b'k']);
        assert_eq!(data, b"ok");
        assert!(replies.is_empty());
    }

    #[test]
    fn sequence_split_across_reads() {
        let mut f = TelnetFilter::new();
        let (data, replies) = run(&mut f, &[b'a', IAC]);
        assert_eq!(data, b"a");
        assert!(replies.is_empty());

        let (data, replies) = run(&mut f, &[DO]);
        assert!(data.is_empty());
        assert!(replies.is_empty());

        let (data, replies) = run(&mut f, &[31, b'b']);
        assert_eq!(data, b"b");
        assert_eq!(replies, vec![IAC, WONT, 31]);
    }
}
