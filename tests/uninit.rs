use windy_mmio::mmio;

#[test]
#[should_panic(expected = "used before it was initialized")]
fn pool_before_init_panics() {
    let _ = mmio::pool();
}
