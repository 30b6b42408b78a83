use spin_bench::bench;
use spin_bench::config::setup;

fn main() {
    let (config, output) = setup();
    println!("{}", config);
    let perf = bench::run(&config);
    output.write_record(&config, &perf);
}
