use std::hint::black_box;
use std::thread::sleep;
use std::time::Duration;

use nix::sys::wait::waitpid;
use nix::unistd::{fork, getpid, ForkResult};

fn print(msg: impl AsRef<str>) {
    let pid = getpid().as_raw();
    let msg = msg.as_ref();
    println!("\x1b[0;31m[{pid}]: {msg}\x1b[0m")
}

/// Holds on to `mib` MiB of touched memory for a little while.
fn hold(mib: usize) {
    let vec = vec![1u8; mib * 1024 * 1024];
    sleep(Duration::from_millis(20));
    black_box(&vec);
}

fn main() {
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            print("child");
            hold(8);
        }
        Ok(ForkResult::Parent { child }) => {
            print(format!("parent of {}", child));
            hold(4);
            waitpid(child, None).expect("failed waiting for child");
        }
        Err(e) => panic!("{}", e),
    }
}
