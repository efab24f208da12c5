use linda_chat::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), ChatError> {
    linda_chat::observability::init_observability();
    let client = ChatClient::from_config(ClientConfig::from_env()?)?;
    let session = client.session(Conversation::seeded(WELCOME_GREETING));
    session.set_persona("Ceria");

    let mut stream = session
        .send(UserInput::text("Ceritakan satu fakta lucu tentang kucing."))
        .await?;

    while let Some(event) = stream.next_event().await {
        match event {
            StreamEvent::Token { text, .. } => print!("{text}"),
            StreamEvent::Done { .. } => println!(),
            StreamEvent::Error { failure, .. } => eprintln!("stream error: {failure}"),
            StreamEvent::Started { .. } | StreamEvent::FirstContent { .. } => {}
        }
    }

    match stream.finish().await {
        Ok(_) => Ok(()),
        Err(ChatError::Stream(StreamFailure::Unavailable)) => {
            let reply = session.reply_without_stream().await?;
            println!("{}", reply.content);
            Ok(())
        }
        Err(err) => Err(err),
    }
}
