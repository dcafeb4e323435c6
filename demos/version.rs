use ledger_btchip::{DeviceSelector, LedgerBtc, TransportType};

fn main() {
    #[cfg(feature = "hid")]
    {
        match LedgerBtc::list_devices() {
            Ok(devices) => {
                for d in &devices {
                    println!("found {} at {}", d.device_type, d.path);
                }
            }
            Err(e) => eprintln!("enumeration failed: {e}"),
        }

        let ledger = LedgerBtc::new(&TransportType::NativeHID(DeviceSelector::Any))
            .unwrap_or_else(|e| {
                eprintln!("failed to connect: {e}");
                std::process::exit(1);
            });
        let version = ledger
            .get_firmware_version()
            .expect("failed to get firmware version");
        println!("{version}");
        match ledger.get_operation_mode() {
            Ok(mode) => println!("operation mode: {mode:?}"),
            Err(e) => println!("operation mode unavailable: {e}"),
        }
    }
    #[cfg(not(feature = "hid"))]
    {
        eprintln!("enable the 'hid' feature to use USB transport");
    }
}
