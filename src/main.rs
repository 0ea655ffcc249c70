fn main() {
    adc_pipeline::cli::run();
}
