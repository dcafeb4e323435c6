//! Verify a PIN given on the command line and report the attempts left.
//!
//! `cargo run --example attempts -- 1234`

use ledger_btchip::{DeviceSelector, LedgerBtc, LedgerError, Pin, TransportType};

fn main() {
    #[cfg(feature = "hid")]
    {
        let Some(pin) = std::env::args().nth(1) else {
            eprintln!("usage: attempts <pin>");
            std::process::exit(2);
        };
        let ledger = LedgerBtc::new(&TransportType::NativeHID(DeviceSelector::Any))
            .unwrap_or_else(|e| {
                eprintln!("failed to connect: {e}");
                std::process::exit(1);
            });

        match ledger.verify_pin(&Pin::from(pin.as_str())) {
            Ok(_) => println!("PIN accepted"),
            Err(LedgerError::WrongPin { remaining_attempts }) => {
                println!("wrong PIN, {remaining_attempts} attempt(s) left");
                println!("unplug and replug the dongle before trying again");
                return;
            }
            Err(e) => {
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
        match ledger.remaining_attempts() {
            Ok(n) => println!("{n} attempt(s) left"),
            Err(e) => eprintln!("{e}"),
        }
    }
    #[cfg(not(feature = "hid"))]
    {
        eprintln!("enable the 'hid' feature to use USB transport");
    }
}
