fn main() {
    // Only the ESP-IDF build produces the sysenv variables embuild forwards;
    // host builds (simulation, tests) have nothing to link.
    if std::env::var("CARGO_CFG_TARGET_OS").as_deref() == Ok("espidf") {
        embuild::espidf::sysenv::output();
    }
}
