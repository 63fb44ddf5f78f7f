use std::hint::black_box;
use std::thread::{self, sleep};
use std::time::Duration;

use nix::sys::wait::waitpid;
use nix::unistd::{fork, getpid, ForkResult};

fn print(msg: impl AsRef<str>) {
    let pid = getpid().as_raw();
    let msg = msg.as_ref();
    println!("\x1b[0;31m[{pid}]: {msg}\x1b[0m")
}

fn main() {
    let count = 10;
    match unsafe { fork() } {
        Ok(ForkResult::Child) => {
            let handles: Vec<_> = (0..count)
                .map(|i| {
                    thread::spawn(move || {
                        let vec = vec![i; 1024_usize.pow(2)];
                        sleep(Duration::from_millis(10));
                        black_box(vec[i]);
                        print(format!("thread: {}", i));
                    })
                })
                .collect();

            for handle in handles {
                handle.join().expect("thread failed");
            }
        }
        Ok(ForkResult::Parent { child }) => {
            print(format!("parent of {} and its {} threads", child, count));
            waitpid(child, None).expect("failed waiting for child");
        }
        Err(e) => panic!("{}", e),
    }
}
