//! Walks a peer's attribute database, prints the discovered tree, and
//! subscribes to Health Thermometer indications when the peer has them.
//!
//! Usage: discover <XX:XX:XX:XX:XX:XX> [public|random]
//!
//! Set RUST_LOG=debug to watch the exchanges.

use gattling::{AddressType, AttTransport, BdAddr, GattClient, L2capStream, Uuid};

const HEALTH_THERMOMETER: Uuid = Uuid::from_u16(0x1809);
const TEMPERATURE_MEASUREMENT: Uuid = Uuid::from_u16(0x2A1C);

fn print_tree<T: AttTransport>(client: &GattClient<T>) {
    println!("Primary services:");
    for service in client.services() {
        println!(
            "  {:#06x}..={:#06x} {}",
            service.start_handle, service.end_handle, service.uuid
        );
        match gattling::assigned::lookup_service(&service.uuid) {
            Some(info) => println!("    {}: {}", info.id, info.name),
            None => println!("    unknown service"),
        }

        for chr in &service.characteristics {
            println!(
                "    characteristic {} at {:#06x}..={:#06x}",
                chr.uuid, chr.first_handle, chr.last_handle
            );
            println!("      flags: {}", chr.props);
            println!("      value at {:#06x}", chr.value_handle);
            if chr.ccc_handle != 0 {
                println!(
                    "      configuration at {:#06x}, last value {:#06x}",
                    chr.ccc_handle, chr.ccc_last_known_value
                );
            }
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let addr: BdAddr = args
        .next()
        .ok_or("usage: discover <XX:XX:XX:XX:XX:XX> [public|random]")?
        .parse()?;
    let addr_type = match args.next().as_deref() {
        Some("random") => AddressType::Random,
        _ => AddressType::Public,
    };

    println!("Connecting to {}...", addr);
    let stream = L2capStream::connect(addr, addr_type)?;
    let mut client = GattClient::new(stream);

    client.set_services_read_callback(|c| {
        if let Err(e) = c.find_all_characteristics() {
            eprintln!("characteristic discovery failed to start: {}", e);
        }
    });
    client.set_characteristics_found_callback(|c| {
        if let Err(e) = c.get_client_characteristic_configuration() {
            eprintln!("descriptor discovery failed to start: {}", e);
        }
    });
    client.set_ccc_read_callback(|c| {
        print_tree(c);

        let Some(si) = c.find_service(&HEALTH_THERMOMETER) else {
            println!("Peer has no thermometer; listening passively.");
            return;
        };
        let Some(ci) = c.find_characteristic(si, &TEMPERATURE_MEASUREMENT) else {
            return;
        };

        let bound = c.bind_value_callback(si, ci, |value| {
            // IEEE-11073 float mantissa, one decimal
            if value.len() >= 2 {
                println!("temperature: {:.1}", f32::from(value[1]) / 10.0);
            }
        });
        if bound.is_ok() {
            if let Err(e) = c.enable_notify_indicate(si, ci, false, true) {
                eprintln!("subscription failed: {}", e);
            }
        }
    });
    client.set_value_callback(|chr, value| {
        println!("{} pushed {:02x?}", chr.uuid, value);
    });

    client.read_primary_services()?;
    loop {
        client.pump()?;
    }
}
