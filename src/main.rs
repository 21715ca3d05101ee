fn main() {
    dlc_lib::run()
}
