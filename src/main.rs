fn main() {
    whisper_transcriber_lib::run()
}
