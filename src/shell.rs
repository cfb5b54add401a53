use anyhow::bail;
use std::io::Write;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::client::Client;

/// Menu-driven front end over [`Client`]: ping first, then loop on
/// download / upload / delete until `4` or end of input.
pub async fn run_shell<R>(client: &Client, input: R) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    match client.ping().await {
        Ok(rtt) => println!("Server is alive. ({:.1} ms)", rtt.as_secs_f64() * 1000.0),
        Err(e) => bail!("Server not responding: {e}"),
    }

    let mut lines = input.lines();
    loop {
        println!("\nChoose operation:");
        println!("1) rrq (download file)");
        println!("2) wrq (upload file)");
        println!("3) delete file");
        println!("4) exit");
        prompt("Your choice: ")?;

        let Some(choice) = lines.next_line().await? else {
            return Ok(());
        };
        match choice.trim() {
            "1" => {
                prompt("Enter filename to download: ")?;
                let Some(name) = lines.next_line().await? else {
                    return Ok(());
                };
                match client.download(name.trim()).await {
                    Ok(size) => println!("Download complete ({size} bytes)"),
                    Err(e) => println!("Download failed: {e}"),
                }
            }
            "2" => {
                prompt("Enter filename to upload: ")?;
                let Some(name) = lines.next_line().await? else {
                    return Ok(());
                };
                let name = name.trim();
                match client.upload(name, name).await {
                    Ok(size) => println!("Upload complete ({size} bytes)"),
                    Err(e) => println!("Upload failed: {e}"),
                }
            }
            "3" => {
                prompt("Enter filename to delete: ")?;
                let Some(name) = lines.next_line().await? else {
                    return Ok(());
                };
                match client.delete(name.trim()).await {
                    Ok(msg) => println!("Delete successful: {msg}"),
                    Err(e) => println!("Delete failed: {e}"),
                }
            }
            "4" => {
                println!("Exiting...");
                return Ok(());
            }
            _ => println!("Invalid option"),
        }
    }
}

fn prompt(text: &str) -> std::io::Result<()> {
    print!("{text}");
    std::io::stdout().flush()
}
