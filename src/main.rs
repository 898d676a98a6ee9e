fn main() {
    std::process::exit(sshclip_shell::run());
}
