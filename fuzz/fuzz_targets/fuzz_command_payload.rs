//! Fuzz target: command payload decoding and relay application
//!
//! Splits the input on `|` into a sequence of pub/sub payloads and drives
//! each through `SwitchState::from_payload` into a `Relay`.
//!
//! Invariants checked:
//! - No panics under any byte sequence
//! - A payload decodes only when it trims to exactly `ON` or `OFF`
//! - The pin is written only when the decoded state differs from the last
//!   applied state
//!
//! cargo fuzz run fuzz_command_payload

#![no_main]

use core::convert::Infallible;

use airguard::records::SwitchState;
use airguard::relay::Relay;
use embedded_hal::digital::{ErrorType, OutputPin};
use libfuzzer_sys::fuzz_target;

#[derive(Default)]
struct CountingPin {
    writes: usize,
}

impl ErrorType for CountingPin {
    type Error = Infallible;
}

impl OutputPin for CountingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.writes += 1;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.writes += 1;
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    let mut relay = Relay::new(CountingPin::default(), true);
    let mut changes = 0usize;

    for payload in data.split(|b| *b == b'|') {
        let Ok(state) = SwitchState::from_payload(payload) else {
            continue;
        };

        let text = core::str::from_utf8(payload).expect("decoded payload is UTF-8");
        assert_eq!(text.trim_matches(|c: char| c.is_ascii_whitespace()), state.token());

        let before = relay.applied();
        let wrote = relay.apply(state).expect("infallible pin");
        assert_eq!(wrote, before != Some(state));
        if wrote {
            changes += 1;
        }
        assert_eq!(relay.applied(), Some(state));
    }

    assert_eq!(relay.pin().writes, changes);
});
